//! Mock device implementations for testing and development.

pub mod serial;

pub use serial::{MockSerialChannel, MockSerialHandle, MockWrite};
