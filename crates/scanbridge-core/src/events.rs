//! Outbound notification events.
//!
//! Every observable transition of a worker is reported as one [`BridgeEvent`]
//! on an mpsc channel. The notification transport (a browser push layer, a
//! JSON-lines printer, a test) sits on the receiving end.
//!
//! Rate-limited rejections are deliberately absent: they only reach the
//! barcode log.
//!
//! # Wire shape
//!
//! Events serialize with an `event` tag in kebab-case:
//!
//! ```
//! use scanbridge_core::BridgeEvent;
//!
//! let event = BridgeEvent::probe_result("10.0.0.5".to_string(), 2001, true);
//! let json = serde_json::to_value(&event).unwrap();
//! assert_eq!(json["event"], "probe-result");
//! assert_eq!(json["result"], "success");
//! ```

use chrono::Local;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

use crate::constants::{DISCOVERY_FAILURE_IP, EVENT_CHANNEL_CAPACITY};
use crate::error::{Error, Result};
use crate::types::{Barcode, BarcodeEntry, ScannerAddress, ScannerRole, display_timestamp};

/// Outcome field of discovery and probe events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// One occurrence reported to the notification transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
#[non_exhaustive]
pub enum BridgeEvent {
    /// Scanner connection opened.
    ConnectionEstablished {
        role: ScannerRole,
        address: ScannerAddress,
        attempt: u32,
        message: String,
        timestamp: String,
    },

    /// Scanner connect attempt failed; another attempt follows after the backoff.
    ConnectionRetry {
        role: ScannerRole,
        address: ScannerAddress,
        attempt: u32,
        max_attempts: u32,
        message: String,
        timestamp: String,
    },

    /// Last scanner connect attempt failed; the worker has stopped.
    ConnectionFailed {
        role: ScannerRole,
        address: ScannerAddress,
        attempt: u32,
        max_attempts: u32,
        message: String,
        timestamp: String,
    },

    /// An established scanner connection was closed or broke; the worker has stopped.
    ConnectionLost {
        role: ScannerRole,
        address: ScannerAddress,
        /// `true` when the scanner closed the connection, `false` on an I/O or protocol error.
        reset: bool,
        message: String,
        timestamp: String,
    },

    /// Accepted read of a value different from the retained one.
    BarcodeNew {
        role: ScannerRole,
        address: ScannerAddress,
        barcode: Barcode,
        message: String,
        timestamp: String,
        history: Vec<BarcodeEntry>,
    },

    /// Accepted read repeating the retained value; its timestamp was refreshed.
    BarcodeDuplicate {
        role: ScannerRole,
        address: ScannerAddress,
        barcode: Barcode,
        message: String,
        timestamp: String,
        history: Vec<BarcodeEntry>,
    },

    /// Serial connection to the inspection machine opened.
    OutputConnected {
        device: String,
        attempt: u32,
        message: String,
        timestamp: String,
    },

    /// Serial connect attempt failed; another attempt follows after the backoff.
    OutputRetry {
        device: String,
        attempt: u32,
        max_attempts: u32,
        message: String,
        timestamp: String,
    },

    /// Last serial connect attempt failed; the forwarder has stopped.
    OutputFailed {
        device: String,
        attempt: u32,
        max_attempts: u32,
        message: String,
        timestamp: String,
    },

    /// Current barcode written to the inspection machine.
    BarcodeSent {
        barcode: Barcode,
        message: String,
        timestamp: String,
    },

    /// Result of one discovery run.
    DiscoveryResult {
        side: ScannerRole,
        result: Outcome,
        ip: String,
        tcp_port: String,
        name: String,
        model: String,
        mac: String,
    },

    /// Result of one reachability probe.
    ProbeResult {
        ip: String,
        port: u16,
        result: Outcome,
    },
}

fn now() -> String {
    display_timestamp(&Local::now())
}

impl BridgeEvent {
    pub fn connection_established(role: ScannerRole, address: ScannerAddress, attempt: u32) -> Self {
        let message = format!("Connected to {role} scanner at {address}.");
        Self::ConnectionEstablished {
            role,
            address,
            attempt,
            message,
            timestamp: now(),
        }
    }

    pub fn connection_retry(
        role: ScannerRole,
        address: ScannerAddress,
        attempt: u32,
        max_attempts: u32,
        backoff_secs: u64,
    ) -> Self {
        Self::ConnectionRetry {
            message: format!(
                "Could not connect to scanner at {address} (attempt {attempt} of {max_attempts}). \
                 Retrying in {backoff_secs} seconds."
            ),
            role,
            address,
            attempt,
            max_attempts,
            timestamp: now(),
        }
    }

    pub fn connection_failed(
        role: ScannerRole,
        address: ScannerAddress,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        Self::ConnectionFailed {
            message: format!(
                "Could not connect to scanner at {address} (attempt {attempt} of {max_attempts}). \
                 Check that the scanner is plugged in, powered on and configured, then refresh to try again."
            ),
            role,
            address,
            attempt,
            max_attempts,
            timestamp: now(),
        }
    }

    pub fn connection_lost(role: ScannerRole, address: ScannerAddress, reset: bool, cause: &str) -> Self {
        let message = if reset {
            format!("Connection to scanner at {address} was reset. Refresh if new barcodes stop appearing.")
        } else {
            format!("Connection to scanner at {address} failed: {cause}. Check the connection and refresh.")
        };
        Self::ConnectionLost {
            role,
            address,
            reset,
            message,
            timestamp: now(),
        }
    }

    pub fn barcode_new(
        role: ScannerRole,
        address: ScannerAddress,
        barcode: Barcode,
        history: Vec<BarcodeEntry>,
    ) -> Self {
        Self::BarcodeNew {
            message: format!("Barcode read: {barcode}"),
            role,
            address,
            barcode,
            timestamp: now(),
            history,
        }
    }

    pub fn barcode_duplicate(
        role: ScannerRole,
        address: ScannerAddress,
        barcode: Barcode,
        history: Vec<BarcodeEntry>,
    ) -> Self {
        Self::BarcodeDuplicate {
            message: format!("Barcode read: {barcode}"),
            role,
            address,
            barcode,
            timestamp: now(),
            history,
        }
    }

    pub fn output_connected(device: impl Into<String>, attempt: u32) -> Self {
        let device = device.into();
        Self::OutputConnected {
            message: format!("Connected to inspection machine on {device}."),
            device,
            attempt,
            timestamp: now(),
        }
    }

    pub fn output_retry(device: impl Into<String>, attempt: u32, max_attempts: u32, backoff_secs: u64) -> Self {
        let device = device.into();
        Self::OutputRetry {
            message: format!(
                "Could not connect to inspection machine on {device} (attempt {attempt} of {max_attempts}). \
                 Retrying in {backoff_secs} seconds."
            ),
            device,
            attempt,
            max_attempts,
            timestamp: now(),
        }
    }

    pub fn output_failed(device: impl Into<String>, attempt: u32, max_attempts: u32, cause: &str) -> Self {
        let device = device.into();
        Self::OutputFailed {
            message: format!(
                "Could not connect to inspection machine on {device}: {cause} (attempt {attempt} of {max_attempts}). \
                 Check that it is powered on and all cables are seated, then refresh to try again."
            ),
            device,
            attempt,
            max_attempts,
            timestamp: now(),
        }
    }

    pub fn barcode_sent(barcode: Barcode) -> Self {
        Self::BarcodeSent {
            message: format!("Barcode sent to inspection machine: {barcode}"),
            barcode,
            timestamp: now(),
        }
    }

    pub fn discovery_found(
        side: ScannerRole,
        ip: String,
        tcp_port: u16,
        name: String,
        model: String,
        mac: String,
    ) -> Self {
        Self::DiscoveryResult {
            side,
            result: Outcome::Success,
            ip,
            tcp_port: tcp_port.to_string(),
            name,
            model,
            mac,
        }
    }

    pub fn discovery_failed(side: ScannerRole) -> Self {
        Self::DiscoveryResult {
            side,
            result: Outcome::Failure,
            ip: DISCOVERY_FAILURE_IP.to_string(),
            tcp_port: DISCOVERY_FAILURE_IP.to_string(),
            name: String::new(),
            model: String::new(),
            mac: String::new(),
        }
    }

    pub fn probe_result(ip: String, port: u16, reachable: bool) -> Self {
        Self::ProbeResult {
            ip,
            port,
            result: if reachable { Outcome::Success } else { Outcome::Failure },
        }
    }

    /// `true` for events after which the emitting worker has stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ConnectionLost { .. } | Self::OutputFailed { .. }
        )
    }
}

/// Sending half of the event channel, cloned into every worker.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<BridgeEvent>,
}

impl EventSink {
    /// Create a sink and its receiver with the default capacity.
    pub fn channel() -> (Self, mpsc::Receiver<BridgeEvent>) {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Deliver an event.
    ///
    /// A full channel is given one short pause before falling back to a
    /// waiting send.
    ///
    /// # Errors
    /// Returns `Error::EventChannelClosed` once the receiver is gone.
    pub async fn emit(&self, event: BridgeEvent) -> Result<()> {
        trace!(?event, "Emitting event");
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
                self.tx.send(event).await.map_err(|_| Error::EventChannelClosed)
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Event receiver dropped");
                Err(Error::EventChannelClosed)
            }
        }
    }

    /// Deliver an event, ignoring a closed channel.
    ///
    /// Workers keep running when nobody listens for their notifications.
    pub async fn notify(&self, event: BridgeEvent) {
        let _ = self.emit(event).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> ScannerAddress {
        "10.0.0.5:2001".parse().unwrap()
    }

    #[test]
    fn test_barcode_new_serialization() {
        let barcode = Barcode::normalize(b"ABC123").unwrap();
        let history = vec![BarcodeEntry::new(barcode.clone(), Local::now())];
        let event = BridgeEvent::barcode_new(ScannerRole::Bottom, addr(), barcode, history);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "barcode-new");
        assert_eq!(json["role"], "bottom");
        assert_eq!(json["address"]["host"], "10.0.0.5");
        assert_eq!(json["barcode"], "ABC123");
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_discovery_failure_shape() {
        let event = BridgeEvent::discovery_failed(ScannerRole::Top);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "discovery-result");
        assert_eq!(json["side"], "top");
        assert_eq!(json["result"], "failure");
        assert_eq!(json["ip"], "-1");
        assert_eq!(json["tcp_port"], "-1");
        assert_eq!(json["mac"], "");
    }

    #[test]
    fn test_terminal_classification() {
        assert!(BridgeEvent::connection_failed(ScannerRole::Top, addr(), 3, 3).is_terminal());
        assert!(BridgeEvent::connection_lost(ScannerRole::Top, addr(), true, "eof").is_terminal());
        assert!(BridgeEvent::output_failed("/dev/ttyS0", 3, 3, "busy").is_terminal());
        assert!(!BridgeEvent::connection_retry(ScannerRole::Top, addr(), 1, 3, 30).is_terminal());
        assert!(!BridgeEvent::output_retry("/dev/ttyS0", 2, 3, 30).is_terminal());
    }

    #[test]
    fn test_retry_message_mentions_attempt() {
        let event = BridgeEvent::connection_retry(ScannerRole::Bottom, addr(), 2, 3, 30);
        let BridgeEvent::ConnectionRetry { message, .. } = event else {
            panic!("wrong variant");
        };
        assert!(message.contains("attempt 2 of 3"));
        assert!(message.contains("30 seconds"));
    }

    #[tokio::test]
    async fn test_sink_delivers() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(BridgeEvent::probe_result("10.0.0.5".into(), 2001, false))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, BridgeEvent::ProbeResult { result: Outcome::Failure, .. }));
    }

    #[tokio::test]
    async fn test_sink_closed() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        assert!(sink.is_closed());
        let result = sink.emit(BridgeEvent::discovery_failed(ScannerRole::Top)).await;
        assert!(matches!(result, Err(Error::EventChannelClosed)));

        // notify() swallows the closed channel
        sink.notify(BridgeEvent::discovery_failed(ScannerRole::Top)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_backpressure() {
        let (sink, mut rx) = EventSink::with_capacity(1);
        sink.emit(BridgeEvent::discovery_failed(ScannerRole::Top)).await.unwrap();

        let reader = tokio::spawn(async move {
            let mut count = 0;
            while rx.recv().await.is_some() {
                count += 1;
            }
            count
        });

        sink.emit(BridgeEvent::discovery_failed(ScannerRole::Bottom)).await.unwrap();
        drop(sink);
        assert_eq!(reader.await.unwrap(), 2);
    }
}
