//! Network side of the scanner bridge.
//!
//! # Components
//!
//! - **ScannerConnection**: TCP connection manager for one scanner (connect
//!   retry, CR LF read loop, debounce and publish)
//! - **probe**: one-shot LAN reachability check returning a [`ProbeHandle`]
//! - **DiscoveryService**: UDP broadcast discovery of compatible scanners
//!
//! # Example
//!
//! ```no_run
//! use scanbridge_core::{BarcodeStore, EventSink, ScannerRole};
//! use scanbridge_network::ScannerConnection;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (events, _rx) = EventSink::channel();
//! let connection = ScannerConnection::new(
//!     ScannerRole::Bottom,
//!     "10.0.0.5:2001".parse()?,
//!     BarcodeStore::new(),
//!     events,
//! );
//! connection.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod discovery;
mod probe;
mod scanner;

pub use discovery::{DiscoveryConfig, DiscoveryError, DiscoveryOutcome, DiscoveryService};
pub use probe::{ProbeConfig, ProbeError, ProbeHandle, probe};
pub use scanner::{ScannerConnection, ScannerConnectionConfig, ScannerError};
