//! Serial channel trait.
//!
//! The trait uses native `async fn` methods (Edition 2024 RPITIT). Opening is
//! an associated function taking an owned, cloneable config so a retry loop
//! can call it repeatedly without holding a borrow across attempts.

#![allow(async_fn_in_trait)]

use std::fmt;

use crate::error::Result;

/// A byte-oriented serial link.
pub trait SerialChannel: Sized + Send {
    /// Everything needed to open the channel. `Display` names the device.
    type Config: Clone + fmt::Display + Send + Sync + 'static;

    /// Open the device and prepare it for writing.
    async fn open(config: Self::Config) -> Result<Self>;

    /// Device path or name, for logs and events.
    fn device(&self) -> &str;

    /// Write `data` and flush it to the device.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read until the device sends a NUL byte, returning the bytes before it.
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Release the device. Further calls fail with `NotOpen`.
    async fn close(&mut self) -> Result<()>;
}
