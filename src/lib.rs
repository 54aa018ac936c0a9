//! Print-farm host: printer registry, per-printer command sessions, state
//! fan-out and the HTTP API the farm dashboard talks to.

pub mod catalog;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gcode;
pub mod printer;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod transport;
pub mod uploads;
pub mod web;

pub use command::Command;
pub use coordinator::{CommandCoordinator, CommandOutcome};
pub use error::PrinterError;
pub use printer::{PrinterDescriptor, PrinterId, PrinterState, PrinterStatus};
pub use registry::PrinterRegistry;
pub use session::PrinterSession;
pub use snapshot::StateSnapshotService;
