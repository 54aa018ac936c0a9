// src/registry.rs - The set of known printers and their sessions
use crate::config::SessionConfig;
use crate::error::PrinterError;
use crate::printer::{Printer, PrinterDescriptor, PrinterId, PrinterKind, PrinterState};
use crate::session::PrinterSession;
use crate::transport::{MoonrakerTransport, PrinterTransport, VirtualPrinter, VirtualPrinterConfig};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Single source of truth for which printers exist.
///
/// Ids are handed out in increasing order and never reused, so iterating the
/// map yields printers in registration order.
pub struct PrinterRegistry {
    sessions: RwLock<Registered>,
    session_config: SessionConfig,
    simulator: VirtualPrinterConfig,
    http: reqwest::Client,
}

#[derive(Default)]
struct Registered {
    next_id: u64,
    sessions: BTreeMap<PrinterId, Arc<PrinterSession>>,
}

impl PrinterRegistry {
    pub fn new(session_config: SessionConfig, simulator: VirtualPrinterConfig) -> Self {
        let http = MoonrakerTransport::client(session_config.submit_timeout());
        Self {
            sessions: RwLock::new(Registered::default()),
            session_config,
            simulator,
            http,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registered> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registered> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a printer, building the transport its descriptor calls for.
    pub fn register(&self, descriptor: PrinterDescriptor) -> Result<PrinterId, PrinterError> {
        validate(&descriptor)?;
        let (transport, initial): (Arc<dyn PrinterTransport>, Option<PrinterState>) = match &descriptor {
            PrinterDescriptor::Physical { host, port, .. } => {
                let url = format!("http://{}:{}", host.trim(), port);
                (Arc::new(MoonrakerTransport::new(self.http.clone(), url)), None)
            }
            PrinterDescriptor::Virtual { status, .. } => {
                let simulator = VirtualPrinter::new(self.simulator.clone(), *status);
                let initial = PrinterState::with_status(*status);
                (Arc::new(simulator), Some(initial))
            }
        };
        self.attach_with(descriptor, transport, initial)
    }

    /// Registers a printer driven by a caller-supplied transport.
    pub fn attach(
        &self,
        descriptor: PrinterDescriptor,
        transport: Arc<dyn PrinterTransport>,
    ) -> Result<PrinterId, PrinterError> {
        validate(&descriptor)?;
        self.attach_with(descriptor, transport, None)
    }

    fn attach_with(
        &self,
        descriptor: PrinterDescriptor,
        transport: Arc<dyn PrinterTransport>,
        initial: Option<PrinterState>,
    ) -> Result<PrinterId, PrinterError> {
        let mut registered = self.write();
        registered.next_id += 1;
        let id = PrinterId(registered.next_id);
        let printer = describe(id, descriptor);
        tracing::info!(printer_id = %id, name = %printer.name, kind = ?printer.kind, "Registering printer");
        let session = PrinterSession::start(printer, transport, initial, self.session_config.clone());
        registered.sessions.insert(id, session);
        Ok(id)
    }

    /// Registered printers in registration order.
    pub fn list(&self) -> Vec<Printer> {
        self.read().sessions.values().map(|s| s.printer().clone()).collect()
    }

    pub fn sessions(&self) -> Vec<Arc<PrinterSession>> {
        self.read().sessions.values().cloned().collect()
    }

    pub fn get(&self, id: PrinterId) -> Result<Arc<PrinterSession>, PrinterError> {
        self.read().sessions.get(&id).cloned().ok_or(PrinterError::NotFound(id))
    }

    pub fn contains(&self, id: PrinterId) -> bool {
        self.read().sessions.contains_key(&id)
    }

    /// The printer addressed by `id`, or the first registered one when absent.
    pub fn resolve(&self, id: Option<PrinterId>) -> Result<Arc<PrinterSession>, PrinterError> {
        match id {
            Some(id) => self.get(id),
            None => self
                .read()
                .sessions
                .values()
                .next()
                .cloned()
                .ok_or(PrinterError::NotFound(PrinterId(0))),
        }
    }

    /// Removes an idle printer and tears its session down.
    pub fn remove(&self, id: PrinterId) -> Result<Printer, PrinterError> {
        let mut registered = self.write();
        let session = registered.sessions.get(&id).ok_or(PrinterError::NotFound(id))?;
        if session.is_busy() {
            tracing::warn!(printer_id = %id, "Refusing to remove printer with a command in flight");
            return Err(PrinterError::InUse(id));
        }
        let session = registered
            .sessions
            .remove(&id)
            .ok_or(PrinterError::NotFound(id))?;
        drop(registered);
        session.shutdown();
        tracing::info!(printer_id = %id, "Printer removed");
        Ok(session.printer().clone())
    }

    /// Tears down every session; used at process shutdown.
    pub fn shutdown(&self) {
        let sessions = std::mem::take(&mut self.write().sessions);
        for session in sessions.values() {
            session.shutdown();
        }
    }

    pub fn len(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate(descriptor: &PrinterDescriptor) -> Result<(), PrinterError> {
    match descriptor {
        PrinterDescriptor::Physical { host, port, .. } => {
            if host.trim().is_empty() {
                return Err(PrinterError::InvalidDescriptor("host must not be empty".to_string()));
            }
            if *port == 0 {
                return Err(PrinterError::InvalidDescriptor("port must not be 0".to_string()));
            }
        }
        PrinterDescriptor::Virtual { name, .. } => {
            if name.trim().is_empty() {
                return Err(PrinterError::InvalidDescriptor("name must not be empty".to_string()));
            }
        }
    }
    Ok(())
}

fn describe(id: PrinterId, descriptor: PrinterDescriptor) -> Printer {
    match descriptor {
        PrinterDescriptor::Physical { name, host, port, last_service } => {
            let host = host.trim().to_string();
            let name = name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("{}:{}", host, port));
            Printer {
                id,
                name,
                kind: PrinterKind::Physical,
                host: Some(host),
                port: Some(port),
                last_service,
            }
        }
        PrinterDescriptor::Virtual { name, last_service, .. } => Printer {
            id,
            name: name.trim().to_string(),
            kind: PrinterKind::Virtual,
            host: None,
            port: None,
            last_service,
        },
    }
}
