//! Mock serial channel for testing and development.
//!
//! The channel and its [`MockSerialHandle`] share one state block. Tests use
//! the handle to script open and write failures, queue device replies, and
//! inspect what was written.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::error::{HardwareError, Result};
use crate::traits::SerialChannel;

/// One write captured by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub at: Instant,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    open_attempts: u32,
    failing_opens: u32,
    failing_writes: u32,
    writes: Vec<MockWrite>,
    replies: VecDeque<Vec<u8>>,
    closed: bool,
}

/// Handle for scripting and inspecting a mock serial device.
///
/// Doubles as the channel's open config; clones share state.
///
/// # Examples
///
/// ```
/// use scanbridge_hardware::mock::{MockSerialChannel, MockSerialHandle};
/// use scanbridge_hardware::traits::SerialChannel;
///
/// #[tokio::main]
/// async fn main() -> scanbridge_hardware::Result<()> {
///     let handle = MockSerialHandle::new("/dev/ttyMOCK0");
///     handle.fail_opens(1);
///
///     assert!(MockSerialChannel::open(handle.clone()).await.is_err());
///     let mut channel = MockSerialChannel::open(handle.clone()).await?;
///
///     channel.send(b"ABC123\r\n").await?;
///     assert_eq!(handle.written(), vec![b"ABC123\r\n".to_vec()]);
///     assert_eq!(handle.open_attempts(), 2);
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MockSerialHandle {
    device: String,
    state: Arc<Mutex<MockState>>,
}

impl MockSerialHandle {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` opens fail as if the device were unplugged.
    pub fn fail_opens(&self, count: u32) {
        self.state().failing_opens = count;
    }

    /// Make the next `count` writes fail.
    pub fn fail_writes(&self, count: u32) {
        self.state().failing_writes = count;
    }

    /// Queue one reply for `receive`.
    pub fn queue_reply(&self, data: impl Into<Vec<u8>>) {
        self.state().replies.push_back(data.into());
    }

    pub fn open_attempts(&self) -> u32 {
        self.state().open_attempts
    }

    /// Payloads written so far, oldest first.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().writes.iter().map(|w| w.data.clone()).collect()
    }

    /// Writes with their (tokio) timestamps.
    pub fn writes(&self) -> Vec<MockWrite> {
        self.state().writes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl fmt::Display for MockSerialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.device)
    }
}

/// Mock serial channel.
#[derive(Debug)]
pub struct MockSerialChannel {
    handle: MockSerialHandle,
    open: bool,
}

impl SerialChannel for MockSerialChannel {
    type Config = MockSerialHandle;

    async fn open(handle: MockSerialHandle) -> Result<Self> {
        {
            let mut state = handle.state();
            state.open_attempts += 1;
            if state.failing_opens > 0 {
                state.failing_opens -= 1;
                return Err(HardwareError::disconnected(&handle.device));
            }
            state.closed = false;
        }
        Ok(Self { handle, open: true })
    }

    fn device(&self) -> &str {
        &self.handle.device
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(HardwareError::not_open(&self.handle.device));
        }
        let mut state = self.handle.state();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(HardwareError::communication("mock write failure"));
        }
        state.writes.push(MockWrite {
            at: Instant::now(),
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        if !self.open {
            return Err(HardwareError::not_open(&self.handle.device));
        }
        self.handle
            .state()
            .replies
            .pop_front()
            .ok_or_else(|| HardwareError::timeout(0))
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        self.handle.state().closed = true;
        Ok(())
    }
}
