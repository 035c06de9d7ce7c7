//! Wire formats spoken by the bridge.
//!
//! - [`codec`]: CR LF barcode lines from scanners (tokio-util `Decoder`/`Encoder`)
//! - [`discovery`]: the UDP discovery query and its comma-separated response

pub mod codec;
pub mod discovery;

pub use codec::BarcodeCodec;
pub use discovery::{DiscoveredScanner, discovery_query, parse_response};
