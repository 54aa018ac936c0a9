// src/printer.rs - Printer identity and live state model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default Moonraker API port.
pub const DEFAULT_MOONRAKER_PORT: u16 = 7125;

/// Registry-assigned printer identifier. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrinterId(pub u64);

impl fmt::Display for PrinterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterKind {
    Physical,
    Virtual,
}

/// Printer status as reported to viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterStatus {
    #[default]
    Idle,
    Printing,
    Paused,
    Error,
    Service,
    Offline,
}

impl PrinterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrinterStatus::Idle => "idle",
            PrinterStatus::Printing => "printing",
            PrinterStatus::Paused => "paused",
            PrinterStatus::Error => "error",
            PrinterStatus::Service => "service",
            PrinterStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for PrinterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrinterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(PrinterStatus::Idle),
            "printing" | "work" => Ok(PrinterStatus::Printing),
            "paused" => Ok(PrinterStatus::Paused),
            "error" => Ok(PrinterStatus::Error),
            "service" => Ok(PrinterStatus::Service),
            "offline" => Ok(PrinterStatus::Offline),
            other => Err(format!("unknown printer status '{}'", other)),
        }
    }
}

/// What the registry needs to bring a printer online.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PrinterDescriptor {
    Physical {
        #[serde(default)]
        name: Option<String>,
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default)]
        last_service: Option<String>,
    },
    Virtual {
        name: String,
        #[serde(default)]
        status: PrinterStatus,
        #[serde(default)]
        last_service: Option<String>,
    },
}

fn default_port() -> u16 {
    DEFAULT_MOONRAKER_PORT
}

impl PrinterDescriptor {
    pub fn physical(host: impl Into<String>, port: u16) -> Self {
        PrinterDescriptor::Physical {
            name: None,
            host: host.into(),
            port,
            last_service: None,
        }
    }

    pub fn virtual_printer(name: impl Into<String>, status: PrinterStatus) -> Self {
        PrinterDescriptor::Virtual {
            name: name.into(),
            status,
            last_service: None,
        }
    }
}

/// Registered printer identity. Owned by the registry; handed out as clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Printer {
    pub id: PrinterId,
    pub name: String,
    pub kind: PrinterKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub last_service: Option<String>,
}

/// Absolute machine coordinates in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Heater readings in °C.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Temperatures {
    pub extruder: f64,
    pub bed: f64,
}

/// Immutable snapshot of one printer. `progress` is `Some` only while printing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PrinterState {
    pub status: PrinterStatus,
    pub progress: Option<f64>,
    pub position: Position,
    pub temperature: Temperatures,
    pub target_temperature: Temperatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl PrinterState {
    pub fn with_status(status: PrinterStatus) -> Self {
        Self::default().transition(status)
    }

    /// Returns a copy moved to `status`, dropping progress outside `printing`.
    pub fn transition(mut self, status: PrinterStatus) -> Self {
        self.status = status;
        match status {
            PrinterStatus::Printing => {
                self.progress = Some(self.progress.unwrap_or(0.0).clamp(0.0, 100.0));
            }
            _ => self.progress = None,
        }
        if status != PrinterStatus::Error {
            self.message = None;
        }
        self
    }

    pub fn fault(self, message: impl Into<String>) -> Self {
        let mut state = self.transition(PrinterStatus::Error);
        state.message = Some(message.into());
        state
    }

    /// Progress rounded to a whole percent, 0 when not printing.
    pub fn percent(&self) -> u8 {
        self.progress.map(|p| p.round().clamp(0.0, 100.0) as u8).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_only_while_printing() {
        let printing = PrinterState::with_status(PrinterStatus::Printing);
        assert_eq!(printing.progress, Some(0.0));
        let idle = printing.transition(PrinterStatus::Idle);
        assert_eq!(idle.progress, None);
        assert_eq!(idle.percent(), 0);
    }

    #[test]
    fn fault_carries_message_until_cleared() {
        let state = PrinterState::default().fault("Emergency stop");
        assert_eq!(state.status, PrinterStatus::Error);
        assert_eq!(state.message.as_deref(), Some("Emergency stop"));
        assert_eq!(state.transition(PrinterStatus::Idle).message, None);
    }

    #[test]
    fn descriptor_from_toml_uses_default_port() {
        let descriptor: PrinterDescriptor = toml::from_str("kind = 'physical'\nhost = '10.0.0.2'").unwrap();
        assert_eq!(descriptor, PrinterDescriptor::physical("10.0.0.2", DEFAULT_MOONRAKER_PORT));
    }

    #[test]
    fn status_parses_dashboard_aliases() {
        assert_eq!("work".parse::<PrinterStatus>().unwrap(), PrinterStatus::Printing);
        assert_eq!(" Idle ".parse::<PrinterStatus>().unwrap(), PrinterStatus::Idle);
        assert!("sleeping".parse::<PrinterStatus>().is_err());
    }

    #[test]
    fn state_serializes_wire_shape() {
        let json = serde_json::to_value(PrinterState::default()).unwrap();
        assert_eq!(json["status"], "idle");
        assert!(json["progress"].is_null());
        assert_eq!(json["position"]["x"], 0.0);
        assert_eq!(json["target_temperature"]["bed"], 0.0);
    }
}
