//! LAN reachability probe.
//!
//! A probe opens one TCP connection with a bounded timeout and closes it
//! again. It runs on its own task; the caller gets a [`ProbeHandle`] for that
//! one request and waits on it with its own bound.
//!
//! ```no_run
//! use scanbridge_network::{ProbeConfig, probe};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = probe("10.0.0.5:2001".parse()?, ProbeConfig::default());
//! match handle.wait().await {
//!     Ok(()) => println!("scanner reachable"),
//!     Err(e) => println!("scanner not reachable: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use scanbridge_core::constants::{PROBE_CONNECT_TIMEOUT_SECS, PROBE_WAIT_TIMEOUT_SECS};
use scanbridge_core::{BridgeEvent, EventSink, ScannerAddress};

/// Probe timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Bound on the TCP connect inside the probe task.
    pub connect_timeout: Duration,

    /// Bound on the caller's wait for the probe result.
    pub wait_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(PROBE_CONNECT_TIMEOUT_SECS),
            wait_timeout: Duration::from_secs(PROBE_WAIT_TIMEOUT_SECS),
        }
    }
}

impl ProbeConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

/// Why a scanner was reported unreachable.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The connect did not complete in time
    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    /// The caller stopped waiting
    #[error("No probe result after {0}ms")]
    WaitTimeout(u64),

    /// The probe task was aborted or panicked
    #[error("Probe task failed: {0}")]
    Task(String),

    /// Connect refused or network error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result slot for one in-flight probe.
#[derive(Debug)]
pub struct ProbeHandle {
    address: ScannerAddress,
    wait_timeout: Duration,
    task: JoinHandle<Result<(), ProbeError>>,
}

/// Start probing `address` and return the handle for its result.
///
/// Must be called from within a tokio runtime.
pub fn probe(address: ScannerAddress, config: ProbeConfig) -> ProbeHandle {
    debug!(%address, "Testing if scanner is reachable");
    let target = address.to_string();
    let connect_timeout = config.connect_timeout;

    let task = tokio::spawn(async move {
        match tokio::time::timeout(connect_timeout, TcpStream::connect(target.as_str())).await {
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(())
            }
            Ok(Err(e)) => Err(ProbeError::Io(e)),
            Err(_) => Err(ProbeError::ConnectionTimeout(connect_timeout.as_millis() as u64)),
        }
    });

    ProbeHandle {
        address,
        wait_timeout: config.wait_timeout,
        task,
    }
}

impl ProbeHandle {
    pub fn address(&self) -> &ScannerAddress {
        &self.address
    }

    /// Wait for the probe to finish.
    ///
    /// # Errors
    ///
    /// Returns the reason the scanner is considered unreachable. A probe still
    /// running after the wait timeout is aborted and reported as
    /// `ProbeError::WaitTimeout`.
    pub async fn wait(mut self) -> Result<(), ProbeError> {
        let result = match tokio::time::timeout(self.wait_timeout, &mut self.task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(ProbeError::Task(join.to_string())),
            Err(_) => {
                self.task.abort();
                Err(ProbeError::WaitTimeout(self.wait_timeout.as_millis() as u64))
            }
        };

        match &result {
            Ok(()) => debug!(address = %self.address, "Scanner reachable"),
            Err(e) => debug!(address = %self.address, error = %e, "Scanner not reachable"),
        }
        result
    }

    /// Wait for the probe and emit its `probe-result` event.
    ///
    /// Returns whether the scanner was reachable.
    pub async fn report(self, events: &EventSink) -> bool {
        let ip = self.address.host().to_string();
        let port = self.address.port();
        let reachable = self.wait().await.is_ok();
        events.notify(BridgeEvent::probe_result(ip, port, reachable)).await;
        reachable
    }
}
