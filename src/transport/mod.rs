//! Printer transports.
//!
//! A transport is the single channel a `PrinterSession` uses to reach its
//! machine: a Moonraker HTTP API for physical printers, or the in-process
//! simulator for virtual ones. Both answer every call with the full printer
//! state as observed right after the call.

pub mod moonraker;
pub mod virtual_printer;

use crate::command::Command;
use crate::printer::PrinterState;
use async_trait::async_trait;
use thiserror::Error;

pub use moonraker::MoonrakerTransport;
pub use virtual_printer::{VirtualPrinter, VirtualPrinterConfig};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The printer could not be reached at all.
    #[error("Printer unreachable: {0}")]
    Unreachable(String),
    /// The printer answered and reported a fault.
    #[error("{0}")]
    Fault(String),
}

#[async_trait]
pub trait PrinterTransport: Send + Sync {
    /// Hands a command to the printer and waits for its acknowledgement.
    async fn execute(&self, command: &Command) -> Result<PrinterState, TransportError>;

    /// Reads the current printer state without side effects.
    async fn query(&self) -> Result<PrinterState, TransportError>;
}
