//! Serial hardware layer for the scanner bridge.
//!
//! This crate owns the link to the inspection machine: a trait for serial
//! channels, a `serialport`-backed implementation, a scriptable mock, and the
//! [`OutputForwarder`] worker that republishes the current barcode.
//!
//! # Serial Channels
//!
//! [`SerialChannel`] uses native `async fn` methods (Rust 1.90 + Edition 2024
//! RPITIT). Workers are generic over the channel and are spawned with a
//! concrete type, so no trait objects are involved:
//!
//! ```no_run
//! use scanbridge_core::{BarcodeStore, EventSink, SerialSettings};
//! use scanbridge_hardware::{OutputForwarder, SerialPortChannel, SerialPortConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> scanbridge_hardware::Result<()> {
//! let (events, _rx) = EventSink::channel();
//! let target = SerialPortConfig::new(SerialSettings::default());
//! let forwarder = OutputForwarder::<SerialPortChannel>::new(target, BarcodeStore::new(), events);
//!
//! let cancel = CancellationToken::new();
//! forwarder.run(cancel.child_token()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`Result<T>`][error::Result] with [`HardwareError`],
//! which separates a vanished device from timeouts and driver errors.
//!
//! # Mock Implementations
//!
//! [`mock::MockSerialChannel`] records writes with their tokio timestamps, so
//! tests under a paused clock can assert exact send cadence.

pub mod error;
pub mod forwarder;
pub mod mock;
pub mod serial;
pub mod traits;

// Re-export commonly used types for convenience
pub use error::{HardwareError, Result};
pub use forwarder::{ForwarderConfig, OutputForwarder};
pub use serial::{SerialPortChannel, SerialPortConfig, SerialTiming};
pub use traits::SerialChannel;
