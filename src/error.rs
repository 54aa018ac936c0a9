// src/error.rs - Coordinator error taxonomy
use crate::printer::PrinterId;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PrinterError {
    #[error("Invalid printer descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Printer {0} not found")]
    NotFound(PrinterId),
    #[error("Printer {0} is busy with another command")]
    Busy(PrinterId),
    #[error("Printer {printer} did not respond within {}ms", .timeout.as_millis())]
    Timeout { printer: PrinterId, timeout: Duration },
    #[error("Device error: {0}")]
    DeviceError(String),
    #[error("Printer {0} has a command in flight")]
    InUse(PrinterId),
}
