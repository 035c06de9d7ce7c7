//! Scanner connection manager.
//!
//! One [`ScannerConnection`] owns the TCP link to one scanner. It connects
//! under the shared [`RetryPolicy`], then reads CR LF lines until the scanner
//! goes away or the worker is cancelled. Every line is debounced through the
//! [`BarcodeStore`], which also publishes accepted reads as the current output
//! barcode.
//!
//! # Architecture
//!
//! ```text
//! Scanner ──(TCP)──> FramedRead<BarcodeCodec> ──> BarcodeStore::record_scan
//!                                                     │
//!                         ┌───────────────────────────┤
//!                         ▼                           ▼
//!                 EventSink (new/duplicate)   barcode_log (tracing)
//! ```
//!
//! # Read loop
//!
//! Each iteration waits the poll interval, then waits up to the read timeout
//! for one line. A read timeout means "no data this poll" and is not an
//! error. A closed or broken connection ends the worker with a terminal
//! `connection-lost` event; there is no reconnect after the connect phase.

use std::time::Duration;

use chrono::Local;
use futures::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use scanbridge_core::constants::{
    BARCODE_LOG_TARGET, MAX_LINE_LENGTH, SCANNER_CONNECT_TIMEOUT_MS, SCANNER_POLL_INTERVAL_MS,
    SCANNER_READ_TIMEOUT_MS,
};
use scanbridge_core::{
    Barcode, BarcodeStore, BridgeEvent, DebounceConfig, EventSink, RetryError, RetryPolicy,
    ScanDecision, ScannerAddress, ScannerRole,
};
use scanbridge_protocol::BarcodeCodec;

/// Timing, retry and debounce settings for one scanner connection.
///
/// # Example
///
/// ```
/// use scanbridge_network::ScannerConnectionConfig;
/// use std::time::Duration;
///
/// let config = ScannerConnectionConfig::default().with_poll_interval(Duration::from_millis(100));
/// assert_eq!(config.read_timeout, Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerConnectionConfig {
    pub retry: RetryPolicy,

    /// Bound on a single TCP connect.
    pub connect_timeout: Duration,

    /// Pause before each read.
    pub poll_interval: Duration,

    /// How long one read waits for a complete line.
    pub read_timeout: Duration,

    pub debounce: DebounceConfig,

    pub max_line_length: usize,
}

impl Default for ScannerConnectionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_millis(SCANNER_CONNECT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(SCANNER_POLL_INTERVAL_MS),
            read_timeout: Duration::from_millis(SCANNER_READ_TIMEOUT_MS),
            debounce: DebounceConfig::default(),
            max_line_length: MAX_LINE_LENGTH,
        }
    }
}

impl ScannerConnectionConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_debounce(mut self, debounce: DebounceConfig) -> Self {
        self.debounce = debounce;
        self
    }
}

/// Errors that end a scanner connection.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// Connection attempt timed out
    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    /// Scanner closed the connection
    #[error("Connection closed by scanner at {0}")]
    ConnectionClosed(ScannerAddress),

    /// Line framing failed
    #[error("Protocol error: {0}")]
    Protocol(#[from] scanbridge_core::Error),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Worker owning the connection to one scanner.
#[derive(Debug)]
pub struct ScannerConnection {
    role: ScannerRole,
    address: ScannerAddress,
    store: BarcodeStore,
    events: EventSink,
    config: ScannerConnectionConfig,
}

async fn open_stream(target: String, timeout: Duration) -> Result<TcpStream, ScannerError> {
    match tokio::time::timeout(timeout, TcpStream::connect(target.as_str())).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(ScannerError::ConnectionTimeout(timeout.as_millis() as u64)),
    }
}

impl ScannerConnection {
    pub fn new(role: ScannerRole, address: ScannerAddress, store: BarcodeStore, events: EventSink) -> Self {
        Self {
            role,
            address,
            store,
            events,
            config: ScannerConnectionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ScannerConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn role(&self) -> ScannerRole {
        self.role
    }

    pub fn address(&self) -> &ScannerAddress {
        &self.address
    }

    /// Connect, then read barcodes until the connection ends or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the last connect error once the retry budget is spent, or the
    /// error that ended the read loop. Cancellation is not an error.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ScannerError> {
        let Some(stream) = self.connect(&cancel).await? else {
            debug!(role = %self.role, address = %self.address, "Scanner connection cancelled before connecting");
            return Ok(());
        };

        let codec = BarcodeCodec::with_max_line_length(self.config.max_line_length);
        let mut lines = FramedRead::new(stream, codec);
        let result = self.read_loop(&mut lines, &cancel).await;

        debug!(role = %self.role, address = %self.address, "Scanner connection closed");
        result
    }

    /// Connect phase. `Ok(None)` when cancelled.
    async fn connect(&self, cancel: &CancellationToken) -> Result<Option<TcpStream>, ScannerError> {
        let policy = self.config.retry;
        let backoff_secs = policy.backoff.as_secs();
        let target = self.address.to_string();
        let timeout = self.config.connect_timeout;

        info!(role = %self.role, address = %self.address, "Connecting to scanner");

        let connected = policy
            .run(
                cancel,
                |_| open_stream(target.clone(), timeout),
                |failure| {
                    let event = if failure.terminal {
                        BridgeEvent::connection_failed(
                            self.role,
                            self.address.clone(),
                            failure.attempt,
                            failure.max_attempts,
                        )
                    } else {
                        BridgeEvent::connection_retry(
                            self.role,
                            self.address.clone(),
                            failure.attempt,
                            failure.max_attempts,
                            backoff_secs,
                        )
                    };
                    let events = self.events.clone();
                    async move { events.notify(event).await }
                },
            )
            .await;

        match connected {
            Ok((stream, attempt)) => {
                info!(role = %self.role, address = %self.address, attempt, "Connected to scanner");
                self.events
                    .notify(BridgeEvent::connection_established(self.role, self.address.clone(), attempt))
                    .await;
                Ok(Some(stream))
            }
            Err(RetryError::Cancelled) => Ok(None),
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(role = %self.role, address = %self.address, attempts, error = %last, "Could not connect to scanner");
                Err(last)
            }
        }
    }

    async fn read_loop(
        &self,
        lines: &mut FramedRead<TcpStream, BarcodeCodec>,
        cancel: &CancellationToken,
    ) -> Result<(), ScannerError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                next = async {
                    tokio::time::sleep(self.config.poll_interval).await;
                    tokio::time::timeout(self.config.read_timeout, lines.next()).await
                } => next,
            };

            match next {
                Err(_) => trace!(address = %self.address, "No data this poll"),
                Ok(Some(Ok(barcode))) => self.handle_barcode(barcode).await,
                Ok(Some(Err(e))) => {
                    error!(role = %self.role, address = %self.address, error = %e, "Scanner connection error");
                    self.events
                        .notify(BridgeEvent::connection_lost(self.role, self.address.clone(), false, &e.to_string()))
                        .await;
                    return Err(e.into());
                }
                Ok(None) => {
                    warn!(role = %self.role, address = %self.address, "Scanner connection reset");
                    self.events
                        .notify(BridgeEvent::connection_lost(
                            self.role,
                            self.address.clone(),
                            true,
                            "connection closed by scanner",
                        ))
                        .await;
                    return Err(ScannerError::ConnectionClosed(self.address.clone()));
                }
            }
        }
    }

    async fn handle_barcode(&self, barcode: Barcode) {
        let outcome = self.store.record_scan(
            &self.address,
            barcode.clone(),
            Instant::now(),
            Local::now(),
            &self.config.debounce,
        );

        match outcome.decision {
            ScanDecision::Rejected { notice: false, .. } => {}
            ScanDecision::Rejected { elapsed, notice: true } => {
                info!(
                    target: BARCODE_LOG_TARGET,
                    role = %self.role,
                    address = %self.address,
                    barcode = %barcode,
                    elapsed = %format_args!("{:.1}", elapsed.as_secs_f64()),
                    window = %format_args!("{:.1}", self.config.debounce.rate_limit_interval.as_secs_f64()),
                    "Scanner time limit not reached; read ignored, further notices suppressed"
                );
            }
            ScanDecision::AcceptedNew => {
                info!(target: BARCODE_LOG_TARGET, role = %self.role, address = %self.address, barcode = %barcode, "Received barcode");
                self.events
                    .notify(BridgeEvent::barcode_new(self.role, self.address.clone(), barcode, outcome.history))
                    .await;
            }
            ScanDecision::AcceptedDuplicate => {
                info!(
                    target: BARCODE_LOG_TARGET,
                    role = %self.role,
                    address = %self.address,
                    barcode = %barcode,
                    "Received barcode (duplicate of previous read)"
                );
                self.events
                    .notify(BridgeEvent::barcode_duplicate(self.role, self.address.clone(), barcode, outcome.history))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = ScannerConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.read_timeout, Duration::from_secs(3));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[tokio::test]
    async fn test_connection_timeout() {
        // Non-routable address (RFC 5737 TEST-NET-1)
        let result = open_stream("192.0.2.1:9999".to_string(), Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ScannerError::ConnectionTimeout(100)) | Err(ScannerError::Io(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_connect() {
        let (events, mut rx) = EventSink::channel();
        let connection = ScannerConnection::new(
            ScannerRole::Bottom,
            "192.0.2.1:2001".parse().unwrap(),
            BarcodeStore::new(),
            events,
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        connection.run(cancel).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
