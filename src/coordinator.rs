// src/coordinator.rs - Externally facing command execution
use crate::command::Command;
use crate::error::PrinterError;
use crate::printer::PrinterId;
use crate::registry::PrinterRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

/// Uniform `{success, message}` answer for every command request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// One line of a printer's operator console.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleEntry {
    pub at: DateTime<Utc>,
    pub command: String,
    pub success: bool,
    pub message: String,
}

/// Bounded per-printer history of command outcomes.
#[derive(Debug)]
struct Console {
    entries: Mutex<HashMap<PrinterId, VecDeque<ConsoleEntry>>>,
    history: usize,
}

impl Console {
    fn record(&self, id: PrinterId, command: String, outcome: &CommandOutcome) {
        if self.history == 0 {
            return;
        }
        let mut console = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = console.entry(id).or_default();
        if entries.len() == self.history {
            entries.pop_front();
        }
        entries.push_back(ConsoleEntry {
            at: Utc::now(),
            command,
            success: outcome.success,
            message: outcome.message.clone(),
        });
    }
}

/// Maps API requests onto registry lookups and session submissions.
///
/// Never fails: every error ends up as `success: false` in the outcome.
/// Commands for one printer run one at a time in the order they arrive;
/// repeated identical commands are executed individually.
pub struct CommandCoordinator {
    registry: Arc<PrinterRegistry>,
    console: Arc<Console>,
}

impl CommandCoordinator {
    pub fn new(registry: Arc<PrinterRegistry>, console_history: usize) -> Self {
        Self {
            registry,
            console: Arc::new(Console {
                entries: Mutex::new(HashMap::new()),
                history: console_history,
            }),
        }
    }

    pub async fn execute(&self, printer_id: PrinterId, command: Command) -> CommandOutcome {
        self.run(Some(printer_id), command).await
    }

    /// Like `execute`, defaulting to the first registered printer.
    pub async fn execute_on(&self, printer_id: Option<PrinterId>, command: Command) -> CommandOutcome {
        self.run(printer_id, command).await
    }

    async fn run(&self, printer_id: Option<PrinterId>, command: Command) -> CommandOutcome {
        let session = match self.registry.resolve(printer_id) {
            Ok(session) => session,
            Err(PrinterError::NotFound(_)) if printer_id.is_none() => {
                return CommandOutcome::failed("No printers registered");
            }
            Err(e) => return CommandOutcome::failed(e.to_string()),
        };
        let id = session.id();
        let description = command.to_string();
        let name = session.printer().name.clone();
        let console = self.console.clone();
        let queued = session.enqueue(command);
        // Awaited detached so the outcome is recorded even if the caller goes away.
        let task = tokio::spawn(async move {
            let outcome = match queued.await {
                Ok(_) => {
                    tracing::info!(printer_id = %id, command = %description, "Command completed");
                    CommandOutcome::ok(format!("{} sent to {}", capitalize(&description), name))
                }
                Err(e) => {
                    tracing::warn!(printer_id = %id, command = %description, "Command failed: {}", e);
                    CommandOutcome::failed(e.to_string())
                }
            };
            console.record(id, description, &outcome);
            outcome
        });
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(printer_id = %id, "Command task failed: {}", e);
                CommandOutcome::failed(format!("Command on printer {} was aborted", id))
            }
        }
    }

    /// Console history for a printer, oldest first.
    pub fn console(&self, id: PrinterId) -> Vec<ConsoleEntry> {
        let console = self.console.entries.lock().unwrap_or_else(PoisonError::into_inner);
        console.get(&id).map(|e| e.iter().cloned().collect()).unwrap_or_default()
    }

    /// Drops console history of a removed printer.
    pub fn forget(&self, id: PrinterId) {
        self.console.entries.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
