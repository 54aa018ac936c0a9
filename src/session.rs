// src/session.rs - Live state and command channel for one printer
//
// A session owns the authoritative cached state of its printer and the only
// path to its transport. At most one command is ever in flight; state is
// replaced wholesale through a watch channel so readers never see a partial
// update and never wait on the transport.
use crate::command::Command;
use crate::config::SessionConfig;
use crate::error::PrinterError;
use crate::printer::{Printer, PrinterId, PrinterState, PrinterStatus};
use crate::transport::{PrinterTransport, TransportError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

/// Published state plus the instant the transport last answered.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub state: PrinterState,
    pub seen_at: Option<Instant>,
}

impl StateSnapshot {
    /// The state viewers should see: silence past `liveness` reads as offline.
    pub fn resolve(&self, liveness: Duration) -> PrinterState {
        match self.seen_at {
            Some(at) if at.elapsed() <= liveness => self.state.clone(),
            _ if self.state.status == PrinterStatus::Offline => self.state.clone(),
            _ => self.state.clone().transition(PrinterStatus::Offline),
        }
    }
}

/// A command waiting for the session dispatcher.
#[derive(Debug)]
struct QueuedCommand {
    command: Command,
    respond_to: oneshot::Sender<Result<PrinterState, PrinterError>>,
}

#[derive(Debug)]
struct InFlight {
    command: String,
    started: Instant,
}

/// Releases the in-flight slot when dropped, whatever way `submit` exits,
/// including a caller dropping the future mid-command.
struct SlotGuard<'a> {
    slot: &'a Mutex<Option<InFlight>>,
    generation: &'a AtomicU64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *slot = None;
    }
}

pub struct PrinterSession {
    printer: Printer,
    transport: Arc<dyn PrinterTransport>,
    config: SessionConfig,
    state_tx: watch::Sender<StateSnapshot>,
    slot: Mutex<Option<InFlight>>,
    // Bumped under the slot lock when a command takes the slot and again when
    // it gives it back. A poll only publishes if nothing moved it meanwhile.
    generation: AtomicU64,
    // Commands accepted by `enqueue` that the dispatcher has not finished.
    pending: AtomicUsize,
    queue: mpsc::Sender<QueuedCommand>,
    shutdown_tx: broadcast::Sender<()>,
}

impl PrinterSession {
    /// Creates the session and spawns its dispatcher and poller tasks.
    ///
    /// `initial` is the state to publish before the first poll; `None` means
    /// the printer has not been heard from yet and reads as offline.
    pub fn start(
        printer: Printer,
        transport: Arc<dyn PrinterTransport>,
        initial: Option<PrinterState>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let snapshot = match initial {
            Some(state) => StateSnapshot { state, seen_at: Some(Instant::now()) },
            None => StateSnapshot {
                state: PrinterState::with_status(PrinterStatus::Offline),
                seen_at: None,
            },
        };
        let (state_tx, _) = watch::channel(snapshot);
        let (queue, queue_rx) = mpsc::channel(config.queue_depth.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        let poll_interval = config.poll_interval();

        let session = Arc::new(Self {
            printer,
            transport,
            config,
            state_tx,
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            queue,
            shutdown_tx,
        });
        Self::spawn_dispatcher(Arc::downgrade(&session), queue_rx, session.shutdown_tx.subscribe());
        Self::spawn_poller(Arc::downgrade(&session), poll_interval, session.shutdown_tx.subscribe());
        tracing::info!(printer_id = %session.id(), name = %session.printer.name, "Printer session started");
        session
    }

    pub fn id(&self) -> PrinterId {
        self.printer.id
    }

    pub fn printer(&self) -> &Printer {
        &self.printer
    }

    /// Latest cached state. Never touches the transport.
    pub fn current_state(&self) -> PrinterState {
        self.state_tx.borrow().resolve(self.config.liveness_timeout())
    }

    /// Push notifications of every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.state_tx.subscribe()
    }

    pub fn liveness_timeout(&self) -> Duration {
        self.config.liveness_timeout()
    }

    /// Whether a command is executing or waiting in the queue.
    pub fn is_busy(&self) -> bool {
        self.lock_slot().is_some() || self.pending.load(Ordering::SeqCst) > 0
    }

    /// Description of the executing command and how long it has run.
    pub fn in_flight(&self) -> Option<(String, Duration)> {
        self.lock_slot()
            .as_ref()
            .map(|f| (f.command.clone(), f.started.elapsed()))
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, command: &Command) -> Result<SlotGuard<'_>, PrinterError> {
        let mut slot = self.lock_slot();
        if slot.is_some() {
            return Err(PrinterError::Busy(self.id()));
        }
        *slot = Some(InFlight {
            command: command.to_string(),
            started: Instant::now(),
        });
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(SlotGuard {
            slot: &self.slot,
            generation: &self.generation,
        })
    }

    /// Runs one command against the transport.
    ///
    /// Fails immediately with `Busy` if another command holds the slot. On
    /// timeout the printer is marked offline, on a device fault it is marked
    /// error; in every case the slot is free again once this returns.
    pub async fn submit(&self, command: Command) -> Result<PrinterState, PrinterError> {
        let _slot = self.acquire(&command)?;
        let started = Instant::now();
        let timeout = self.config.submit_timeout();
        tracing::debug!(printer_id = %self.id(), command = %command, "Dispatching command");

        match tokio::time::timeout(timeout, self.transport.execute(&command)).await {
            Ok(Ok(state)) => {
                tracing::debug!(
                    printer_id = %self.id(),
                    command = %command,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Command acknowledged"
                );
                self.finish(|_| state.clone(), true);
                Ok(state)
            }
            Ok(Err(TransportError::Fault(message))) => {
                tracing::error!(printer_id = %self.id(), command = %command, "Device fault: {}", message);
                self.finish(|prev| prev.clone().fault(message.clone()), true);
                Err(PrinterError::DeviceError(message))
            }
            Ok(Err(TransportError::Unreachable(reason))) => {
                tracing::warn!(printer_id = %self.id(), command = %command, "Printer unreachable: {}", reason);
                self.finish(|prev| prev.clone().transition(PrinterStatus::Offline), false);
                Err(PrinterError::Timeout { printer: self.id(), timeout })
            }
            Err(_) => {
                tracing::warn!(
                    printer_id = %self.id(),
                    command = %command,
                    timeout_ms = timeout.as_millis() as u64,
                    "Command timed out"
                );
                self.finish(|prev| prev.clone().transition(PrinterStatus::Offline), false);
                Err(PrinterError::Timeout { printer: self.id(), timeout })
            }
        }
    }

    /// Publishes a command result. The slot is still held here.
    fn finish(&self, next: impl FnOnce(&PrinterState) -> PrinterState, seen: bool) {
        self.state_tx.send_modify(|snapshot| {
            let state = next(&snapshot.state);
            log_transition(self.id(), &snapshot.state, &state);
            snapshot.state = state;
            if seen {
                snapshot.seen_at = Some(Instant::now());
            }
        });
    }

    /// Queues a command behind any already waiting and resolves once it ran.
    ///
    /// The command takes its place in the queue when this is called, not when
    /// the returned future is first polled. A full queue is reported as
    /// `Busy`; a session torn down while the command waited reports `NotFound`.
    pub fn enqueue(
        &self,
        command: Command,
    ) -> impl Future<Output = Result<PrinterState, PrinterError>> + Send + use<> {
        let id = self.id();
        let (respond_to, response) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::SeqCst);
        let accepted = self
            .queue
            .try_send(QueuedCommand { command, respond_to })
            .map_err(|e| {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                match e {
                    TrySendError::Full(_) => PrinterError::Busy(id),
                    TrySendError::Closed(_) => PrinterError::NotFound(id),
                }
            });
        async move {
            accepted?;
            response.await.map_err(|_| PrinterError::NotFound(id))?
        }
    }

    /// Refreshes the cached state from the transport between commands.
    pub async fn poll(&self) {
        let generation = {
            let slot = self.lock_slot();
            if slot.is_some() {
                return;
            }
            self.generation.load(Ordering::SeqCst)
        };
        let result = tokio::time::timeout(self.config.submit_timeout(), self.transport.query()).await;
        self.state_tx.send_if_modified(|snapshot| {
            if self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            let (state, seen) = match &result {
                Ok(Ok(state)) => (state.clone(), true),
                Ok(Err(TransportError::Fault(message))) => (snapshot.state.clone().fault(message.clone()), true),
                Ok(Err(TransportError::Unreachable(_))) | Err(_) => {
                    if snapshot.state.status == PrinterStatus::Offline {
                        return false;
                    }
                    (snapshot.state.clone().transition(PrinterStatus::Offline), false)
                }
            };
            log_transition(self.id(), &snapshot.state, &state);
            snapshot.state = state;
            if seen {
                snapshot.seen_at = Some(Instant::now());
            }
            true
        });
    }

    /// Stops the dispatcher and poller. Queued commands resolve `NotFound`.
    pub fn shutdown(&self) {
        tracing::info!(printer_id = %self.id(), "Printer session shutting down");
        let _ = self.shutdown_tx.send(());
    }

    fn spawn_dispatcher(
        session: Weak<Self>,
        mut queue: mpsc::Receiver<QueuedCommand>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    request = queue.recv() => {
                        let Some(QueuedCommand { command, respond_to }) = request else { break };
                        let Some(session) = session.upgrade() else { break };
                        let result = session.submit(command).await;
                        session.pending.fetch_sub(1, Ordering::SeqCst);
                        let _ = respond_to.send(result);
                    }
                }
            }
            tracing::debug!("Command dispatcher stopped");
        });
    }

    fn spawn_poller(session: Weak<Self>, every: Duration, mut shutdown_rx: broadcast::Receiver<()>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        let Some(session) = session.upgrade() else { break };
                        session.poll().await;
                    }
                }
            }
            tracing::debug!("State poller stopped");
        });
    }
}

impl Drop for PrinterSession {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

fn log_transition(id: PrinterId, from: &PrinterState, to: &PrinterState) {
    if from.status == to.status {
        return;
    }
    match to.status {
        PrinterStatus::Error => tracing::error!(
            printer_id = %id,
            "Printer {} -> error: {}",
            from.status,
            to.message.as_deref().unwrap_or("unknown fault")
        ),
        PrinterStatus::Offline => tracing::warn!(printer_id = %id, "Printer {} -> offline", from.status),
        status => tracing::info!(printer_id = %id, "Printer {} -> {}", from.status, status),
    }
}
