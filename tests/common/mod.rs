#![allow(dead_code)]

use async_trait::async_trait;
use printfarm::command::Command;
use printfarm::config::SessionConfig;
use printfarm::printer::{PrinterState, PrinterStatus};
use printfarm::transport::{PrinterTransport, TransportError, VirtualPrinterConfig};
use std::sync::Mutex;
use std::time::Duration;

/// Scriptable transport that records what it was asked to run.
pub struct MockTransport {
    delay: Mutex<Duration>,
    fail_with: Mutex<Option<TransportError>>,
    state: Mutex<PrinterState>,
    log: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: Mutex::new(delay),
            fail_with: Mutex::new(None),
            state: Mutex::new(PrinterState::with_status(PrinterStatus::Idle)),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn fail_with(&self, error: Option<TransportError>) {
        *self.fail_with.lock().unwrap() = error;
    }

    pub fn set_state(&self, state: PrinterState) {
        *self.state.lock().unwrap() = state;
    }

    /// G-code of every executed command, in arrival order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrinterTransport for MockTransport {
    async fn execute(&self, command: &Command) -> Result<PrinterState, TransportError> {
        self.log.lock().unwrap().push(command.to_gcode());
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.state.lock().unwrap().clone())
    }

    async fn query(&self) -> Result<PrinterState, TransportError> {
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.state.lock().unwrap().clone())
    }
}

/// Session timing for tests: background polling effectively disabled.
pub fn session_config(submit_timeout_ms: u64) -> SessionConfig {
    SessionConfig {
        submit_timeout_ms,
        liveness_timeout_ms: 60_000,
        poll_interval_ms: 60_000,
        queue_depth: 16,
        console_history: 100,
    }
}

/// Simulator that answers almost immediately with stable readings.
pub fn fast_simulator(latency_ms: u64) -> VirtualPrinterConfig {
    VirtualPrinterConfig {
        latency_ms,
        ..VirtualPrinterConfig::default()
    }
}
