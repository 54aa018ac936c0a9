// src/snapshot.rs - Read-only fan-out of printer state
use crate::error::PrinterError;
use crate::printer::{PrinterId, PrinterState};
use crate::registry::PrinterRegistry;
use crate::session::StateSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Serves cached printer state to any number of concurrent pollers.
#[derive(Clone)]
pub struct StateSnapshotService {
    registry: Arc<PrinterRegistry>,
}

/// Push subscription to one printer's state.
pub struct StateSubscription {
    pub printer_id: PrinterId,
    pub receiver: watch::Receiver<StateSnapshot>,
    pub liveness: Duration,
}

impl StateSnapshotService {
    pub fn new(registry: Arc<PrinterRegistry>) -> Self {
        Self { registry }
    }

    pub fn snapshot(&self, printer_id: PrinterId) -> Result<PrinterState, PrinterError> {
        Ok(self.registry.get(printer_id)?.current_state())
    }

    /// Snapshot of `printer_id`, or of the first registered printer.
    pub fn snapshot_or_default(&self, printer_id: Option<PrinterId>) -> Result<(PrinterId, PrinterState), PrinterError> {
        let session = self.registry.resolve(printer_id)?;
        Ok((session.id(), session.current_state()))
    }

    pub fn subscribe(&self, printer_id: Option<PrinterId>) -> Result<StateSubscription, PrinterError> {
        let session = self.registry.resolve(printer_id)?;
        Ok(StateSubscription {
            printer_id: session.id(),
            receiver: session.subscribe(),
            liveness: session.liveness_timeout(),
        })
    }
}
