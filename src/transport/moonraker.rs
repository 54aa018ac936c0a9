// src/transport/moonraker.rs - Physical printers behind a Moonraker API
use super::{PrinterTransport, TransportError};
use crate::command::Command;
use crate::printer::{Position, PrinterState, PrinterStatus, Temperatures};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;

const STATE_QUERY: &str = "printer/objects/query?webhooks&print_stats&display_status&extruder&heater_bed&toolhead";

/// Talks to Klipper through Moonraker's HTTP API.
#[derive(Debug, Clone)]
pub struct MoonrakerTransport {
    client: reqwest::Client,
    base_url: String,
}

impl MoonrakerTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Client with a connect timeout, shared by every Moonraker session.
    pub fn client(connect_timeout: Duration) -> reqwest::Client {
        reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, request: reqwest::RequestBuilder) -> Result<(), TransportError> {
        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Fault(error_message(status, &body)))
    }
}

#[async_trait]
impl PrinterTransport for MoonrakerTransport {
    async fn execute(&self, command: &Command) -> Result<PrinterState, TransportError> {
        let request = match command {
            Command::EmergencyStop => self.client.post(format!("{}/printer/emergency_stop", self.base_url)),
            _ => self
                .client
                .post(format!("{}/printer/gcode/script", self.base_url))
                .json(&serde_json::json!({ "script": command.to_gcode() })),
        };
        self.post(request).await?;
        self.query().await
    }

    async fn query(&self) -> Result<PrinterState, TransportError> {
        let response = self
            .client
            .get(format!("{}/{}", self.base_url, STATE_QUERY))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Fault(error_message(status, &body)));
        }
        let body: QueryResponse = response.json().await.map_err(request_error)?;
        Ok(body.result.status.into_state())
    }
}

fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_decode() {
        TransportError::Fault(format!("Malformed Moonraker response: {}", err))
    } else {
        TransportError::Unreachable(err.to_string())
    }
}

/// Moonraker wraps failures as `{"error": {"code": .., "message": ..}}`.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("Moonraker returned HTTP {}", status))
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    status: ObjectStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ObjectStatus {
    webhooks: Option<Webhooks>,
    print_stats: Option<PrintStats>,
    display_status: Option<DisplayStatus>,
    extruder: Option<Heater>,
    heater_bed: Option<Heater>,
    toolhead: Option<Toolhead>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Webhooks {
    state: Option<String>,
    state_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrintStats {
    state: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DisplayStatus {
    progress: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Heater {
    temperature: Option<f64>,
    target: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Toolhead {
    position: Option<Vec<f64>>,
}

impl ObjectStatus {
    fn into_state(self) -> PrinterState {
        let extruder = self.extruder.unwrap_or_default();
        let bed = self.heater_bed.unwrap_or_default();
        let mut state = PrinterState {
            temperature: Temperatures {
                extruder: extruder.temperature.unwrap_or(0.0),
                bed: bed.temperature.unwrap_or(0.0),
            },
            target_temperature: Temperatures {
                extruder: extruder.target.unwrap_or(0.0),
                bed: bed.target.unwrap_or(0.0),
            },
            last_update: Some(Utc::now()),
            ..PrinterState::default()
        };
        if let Some(pos) = self.toolhead.and_then(|t| t.position) {
            state.position = Position {
                x: pos.first().copied().unwrap_or(0.0),
                y: pos.get(1).copied().unwrap_or(0.0),
                z: pos.get(2).copied().unwrap_or(0.0),
            };
        }

        // Klippy itself being down trumps whatever print_stats says.
        let webhooks = self.webhooks.unwrap_or_default();
        if matches!(webhooks.state.as_deref(), Some("shutdown") | Some("error")) {
            let message = webhooks.state_message.unwrap_or_else(|| "Klipper is shut down".to_string());
            return state.fault(message.trim().to_string());
        }

        let stats = self.print_stats.unwrap_or_default();
        let status = match stats.state.as_deref() {
            Some("printing") => PrinterStatus::Printing,
            Some("paused") => PrinterStatus::Paused,
            Some("error") => {
                let message = stats.message.unwrap_or_else(|| "Print failed".to_string());
                return state.fault(message);
            }
            _ => PrinterStatus::Idle,
        };
        if status == PrinterStatus::Printing {
            let progress = self.display_status.and_then(|d| d.progress).unwrap_or(0.0);
            state.progress = Some((progress * 100.0).clamp(0.0, 100.0));
        }
        state.transition(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(value: serde_json::Value) -> PrinterState {
        let parsed: QueryResponse = serde_json::from_value(json!({ "result": { "status": value } })).unwrap();
        parsed.result.status.into_state()
    }

    #[test]
    fn printing_state_maps_all_fields() {
        let state = status(json!({
            "webhooks": { "state": "ready" },
            "print_stats": { "state": "printing" },
            "display_status": { "progress": 0.5 },
            "extruder": { "temperature": 209.6, "target": 210.0 },
            "heater_bed": { "temperature": 59.9, "target": 60.0 },
            "toolhead": { "position": [110.0, 95.5, 3.2, 1024.0] }
        }));
        assert_eq!(state.status, PrinterStatus::Printing);
        assert_eq!(state.progress, Some(50.0));
        assert_eq!(state.position, Position { x: 110.0, y: 95.5, z: 3.2 });
        assert_eq!(state.temperature.extruder, 209.6);
        assert_eq!(state.target_temperature.bed, 60.0);
    }

    #[test]
    fn standby_and_complete_are_idle_without_progress() {
        for s in ["standby", "complete", "cancelled"] {
            let state = status(json!({
                "print_stats": { "state": s },
                "display_status": { "progress": 1.0 }
            }));
            assert_eq!(state.status, PrinterStatus::Idle);
            assert_eq!(state.progress, None);
        }
    }

    #[test]
    fn klippy_shutdown_is_error() {
        let state = status(json!({
            "webhooks": { "state": "shutdown", "state_message": "Emergency stop\n" },
            "print_stats": { "state": "printing" }
        }));
        assert_eq!(state.status, PrinterStatus::Error);
        assert_eq!(state.message.as_deref(), Some("Emergency stop"));
    }

    #[test]
    fn missing_objects_default_to_zero() {
        let state = status(json!({}));
        assert_eq!(state.status, PrinterStatus::Idle);
        assert_eq!(state.target_temperature, Temperatures::default());
    }

    #[test]
    fn error_body_message_is_extracted() {
        let body = r#"{"error": {"code": 400, "message": "Move out of range: 300.000 0.000 0.000 [0.000]"}}"#;
        assert_eq!(
            error_message(reqwest::StatusCode::BAD_REQUEST, body),
            "Move out of range: 300.000 0.000 0.000 [0.000]"
        );
        assert_eq!(
            error_message(reqwest::StatusCode::BAD_GATEWAY, "<html>"),
            "Moonraker returned HTTP 502 Bad Gateway"
        );
    }
}
