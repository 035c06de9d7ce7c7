//! Inspection Output Forwarder.
//!
//! Republishes the current barcode to the inspection machine over serial.
//!
//! ```text
//!  connect (RetryPolicy) ──fail x3──> OutputFailed event, stop
//!        │
//!        ▼
//!  ┌─> fresh barcode? ──no──> wait send_interval ─┐
//!  │        │ yes                                  │
//!  │        ▼                                      │
//!  │   write "<barcode>\r\n" ──err──> log, wait ───┤
//!  │        │ ok                                   │
//!  │        ▼                                      │
//!  │   BarcodeSent event, wait send_interval       │
//!  └───────────────────────────────────────────────┘
//! ```
//!
//! The connection is opened once. After the connect phase the loop runs until
//! cancelled; write failures never tear it down.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use scanbridge_core::constants::{BARCODE_LOG_TARGET, OUTPUT_FRESHNESS_SECS, OUTPUT_SEND_INTERVAL_SECS};
use scanbridge_core::{BarcodeStore, BridgeEvent, EventSink, RetryError, RetryPolicy};

use crate::error::Result;
use crate::traits::SerialChannel;

/// Forwarder timing and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderConfig {
    pub retry: RetryPolicy,

    /// Maximum age of the current barcode that is still sent.
    pub freshness_window: Duration,

    /// Pause after each write, and idle poll interval while stale.
    pub send_interval: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            freshness_window: Duration::from_secs(OUTPUT_FRESHNESS_SECS),
            send_interval: Duration::from_secs(OUTPUT_SEND_INTERVAL_SECS),
        }
    }
}

impl ForwarderConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.freshness_window = window;
        self
    }

    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }
}

/// Worker that owns the serial link to the inspection machine.
#[derive(Debug)]
pub struct OutputForwarder<C: SerialChannel> {
    target: C::Config,
    store: BarcodeStore,
    events: EventSink,
    config: ForwarderConfig,
}

impl<C: SerialChannel> OutputForwarder<C> {
    pub fn new(target: C::Config, store: BarcodeStore, events: EventSink) -> Self {
        Self {
            target,
            store,
            events,
            config: ForwarderConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ForwarderConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect, then forward until `cancel` fires.
    ///
    /// # Errors
    /// The last connect error once the retry budget is spent. Cancellation is
    /// not an error.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let device = self.target.to_string();
        let policy = self.config.retry;
        let backoff_secs = policy.backoff.as_secs();
        let target = self.target.clone();
        let events = self.events.clone();

        let connected = policy
            .run(
                &cancel,
                |_| C::open(target.clone()),
                |failure| {
                    let events = events.clone();
                    let event = if failure.terminal {
                        BridgeEvent::output_failed(
                            device.clone(),
                            failure.attempt,
                            failure.max_attempts,
                            &failure.cause,
                        )
                    } else {
                        BridgeEvent::output_retry(
                            device.clone(),
                            failure.attempt,
                            failure.max_attempts,
                            backoff_secs,
                        )
                    };
                    async move { events.notify(event).await }
                },
            )
            .await;

        let (mut channel, attempt) = match connected {
            Ok(connected) => connected,
            Err(RetryError::Cancelled) => {
                debug!(%device, "Output forwarder cancelled before connecting");
                return Ok(());
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(%device, attempts, error = %last, "Could not connect to inspection machine");
                return Err(last);
            }
        };

        info!(%device, attempt, "Connected to inspection machine");
        self.events
            .notify(BridgeEvent::output_connected(device.clone(), attempt))
            .await;

        self.forward(&mut channel, &cancel).await;

        if let Err(e) = channel.close().await {
            debug!(%device, error = %e, "Error closing serial channel");
        }
        info!(%device, "Output forwarder stopped");
        Ok(())
    }

    /// The send loop. Returns only on cancellation.
    async fn forward(&self, channel: &mut C, cancel: &CancellationToken) {
        let interval = self.config.send_interval;

        loop {
            let Some(barcode) = self
                .store
                .fresh_barcode(Instant::now(), self.config.freshness_window)
            else {
                trace!("No fresh barcode to send");
                if !pause(interval, cancel).await {
                    return;
                }
                continue;
            };

            let line = barcode.to_line();
            let written = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                written = channel.send(&line) => written,
            };

            match written {
                Ok(()) => {
                    info!(
                        target: BARCODE_LOG_TARGET,
                        barcode = %barcode,
                        device = channel.device(),
                        "Barcode sent to inspection machine"
                    );
                    self.events.notify(BridgeEvent::barcode_sent(barcode)).await;
                    if !pause(interval, cancel).await {
                        return;
                    }
                }
                Err(e) => {
                    error!(device = channel.device(), barcode = %barcode, error = %e, "Serial write failed");
                    if !pause(interval, cancel).await {
                        return;
                    }
                }
            }
        }
    }
}

/// Sleep for `duration`; `false` if cancelled first.
async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
