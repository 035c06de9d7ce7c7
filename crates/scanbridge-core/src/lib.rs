//! Core domain types for the scanbridge barcode bridge.
//!
//! This crate holds everything that is shared between the scanner side and the
//! inspection-machine side of the bridge without doing any socket or serial I/O
//! itself:
//!
//! - [`types`]: scanner roles, addresses and normalized barcodes
//! - [`debounce`]: the per-scanner rate limiter (pure state transitions)
//! - [`store`]: the lock-guarded store of scanner state and the current output barcode
//! - [`events`]: the outbound notification union and its channel sink
//! - [`retry`]: the fixed-attempt, fixed-backoff connect policy shared by all transports
//! - [`config`]: endpoint configuration and its validator
//!
//! # Data flow
//!
//! ```text
//! ScannerConnection ──> BarcodeStore::record_scan ──> current barcode ──> OutputForwarder
//!        │                      │
//!        └──────> EventSink <───┘
//! ```

pub mod config;
pub mod constants;
pub mod debounce;
pub mod error;
pub mod events;
pub mod retry;
pub mod store;
pub mod types;

pub use config::{
    BridgeConfig, CommType, EndpointConfig, OutputConfig, Parity, ScannerEndpoint, ScannerLink,
    SerialSettings,
};
pub use debounce::{DebounceConfig, ScanDecision, ScannerState};
pub use error::{Error, Result};
pub use events::{BridgeEvent, EventSink, Outcome};
pub use retry::{AttemptFailure, RetryError, RetryPolicy};
pub use store::{BarcodeStore, CurrentBarcode, ScanOutcome};
pub use types::{Barcode, BarcodeEntry, ScannerAddress, ScannerRole, display_timestamp};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
