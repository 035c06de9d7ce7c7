//! Worker supervisor.
//!
//! Spawns one task per long-lived duty (each scanner connection and the
//! output forwarder) and aggregates their notifications into one event
//! stream.
//!
//! ```text
//! ┌──────────────┐
//! │ Scanner      │──────►┌─────────────────┐
//! │ (bottom)     │       │                 │
//! └──────────────┘       │  Event Channel  │──────► BridgeHandle::recv
//! ┌──────────────┐       │  (mpsc)         │
//! │ Scanner      │──────►│                 │
//! │ (top)        │       └─────────────────┘
//! └──────────────┘               ▲
//! ┌──────────────┐               │
//! │ Output       │───────────────┘
//! │ forwarder    │
//! └──────────────┘
//! ```
//!
//! Every worker gets a child of one `CancellationToken`. Shutdown cancels it,
//! gives the workers a grace period to close their sockets and ports, then
//! aborts whatever is left.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use scanbridge_core::{BarcodeStore, BridgeEvent, EventSink, ScannerAddress, ScannerRole};
use scanbridge_hardware::{ForwarderConfig, OutputForwarder, SerialPortChannel, SerialPortConfig};
use scanbridge_network::{ScannerConnection, ScannerConnectionConfig};

/// Which duty a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    Scanner(ScannerRole),
    Output,
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scanner(role) => write!(f, "{role} scanner"),
            Self::Output => f.write_str("output forwarder"),
        }
    }
}

type WorkerResult = (Worker, anyhow::Result<()>);

/// Builder that spawns the bridge workers.
pub struct BridgeSupervisor {
    store: BarcodeStore,
    events: EventSink,
    event_rx: mpsc::Receiver<BridgeEvent>,
    cancel: CancellationToken,
    tasks: JoinSet<WorkerResult>,
    scanner_config: ScannerConnectionConfig,
    forwarder_config: ForwarderConfig,
}

impl Default for BridgeSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeSupervisor {
    pub fn new() -> Self {
        let (events, event_rx) = EventSink::channel();
        Self {
            store: BarcodeStore::new(),
            events,
            event_rx,
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
            scanner_config: ScannerConnectionConfig::default(),
            forwarder_config: ForwarderConfig::default(),
        }
    }

    /// Token for a worker built outside the supervisor.
    pub fn worker_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Spawn an already-built worker future.
    pub fn spawn<F, E>(&mut self, worker: Worker, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<anyhow::Error> + Send + 'static,
    {
        debug!(%worker, "Spawning worker");
        self.tasks.spawn(async move {
            let result = future.await.map_err(Into::into);
            (worker, result)
        });
    }

    /// Spawn the connection manager for one scanner.
    pub fn spawn_scanner(&mut self, role: ScannerRole, address: ScannerAddress) {
        let connection = ScannerConnection::new(role, address, self.store.clone(), self.events.clone())
            .with_config(self.scanner_config);
        let token = self.worker_token();
        self.spawn(Worker::Scanner(role), connection.run(token));
    }

    /// Spawn the forwarder to the inspection machine on a hardware serial port.
    pub fn spawn_serial_output(&mut self, target: SerialPortConfig) {
        let forwarder = OutputForwarder::<SerialPortChannel>::new(target, self.store.clone(), self.events.clone())
            .with_config(self.forwarder_config);
        let token = self.worker_token();
        self.spawn(Worker::Output, forwarder.run(token));
    }

    /// Hand over to the running bridge.
    ///
    /// The supervisor's own event sender is dropped here, so the event stream
    /// ends once every worker has finished.
    pub fn start(self) -> BridgeHandle {
        info!(workers = self.tasks.len(), "Bridge started");
        BridgeHandle {
            event_rx: self.event_rx,
            cancel: self.cancel,
            tasks: self.tasks,
        }
    }
}

/// Counts of how each worker ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub panicked: usize,
}

impl ShutdownReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled + self.panicked
    }

    fn record(&mut self, termination: TaskTermination) {
        match termination {
            TaskTermination::Success => self.succeeded += 1,
            TaskTermination::Error => self.failed += 1,
            TaskTermination::Cancelled => self.cancelled += 1,
            TaskTermination::Panic => self.panicked += 1,
        }
    }
}

/// Task termination classification for shutdown handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    Success,
    Error,
    /// Aborted after the grace period.
    Cancelled,
    Panic,
}

/// The running bridge.
pub struct BridgeHandle {
    event_rx: mpsc::Receiver<BridgeEvent>,
    cancel: CancellationToken,
    tasks: JoinSet<WorkerResult>,
}

impl BridgeHandle {
    /// Next event from any worker; `None` once every worker has finished.
    pub async fn recv(&mut self) -> Option<BridgeEvent> {
        self.event_rx.recv().await
    }

    /// Cancel every worker, wait up to `grace` for them to stop, then abort the rest.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        info!(workers = self.tasks.len(), "Shutting down bridge");
        self.cancel.cancel();

        let mut report = ShutdownReport::default();
        let deadline = Instant::now() + grace;

        loop {
            match tokio::time::timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(result)) => report.record(classify_task_result(result)),
                Ok(None) => break,
                Err(_) => {
                    warn!(remaining = self.tasks.len(), "Workers still running after grace period, aborting");
                    self.tasks.abort_all();
                    while let Some(result) = self.tasks.join_next().await {
                        report.record(classify_task_result(result));
                    }
                    break;
                }
            }
        }

        info!(
            workers = report.total(),
            succeeded = report.succeeded,
            failed = report.failed,
            cancelled = report.cancelled,
            panicked = report.panicked,
            "Bridge stopped"
        );
        report
    }
}

fn classify_task_result(result: Result<WorkerResult, JoinError>) -> TaskTermination {
    match result {
        Ok((worker, Ok(()))) => {
            debug!(%worker, "Worker stopped");
            TaskTermination::Success
        }
        Ok((worker, Err(e))) => {
            let e = e.context(format!("{worker} failed"));
            warn!(error = format!("{e:#}"), "Worker ended with an error");
            TaskTermination::Error
        }
        Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
        Err(e) => {
            error!(error = %e, "Worker panicked");
            TaskTermination::Panic
        }
    }
}
