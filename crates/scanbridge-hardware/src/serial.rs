//! Serial channel backed by the `serialport` crate.
//!
//! The driver is blocking, so every port call runs on tokio's blocking pool.
//! The port handle is shared with those calls through `Arc<Mutex<..>>`.
//!
//! Inspection machines are slow to settle after a port opens or a line is
//! written, so the channel waits fixed delays around both:
//!
//! ```text
//! open:  open port -> wait open_settle -> clear in/out buffers
//! send:  write -> wait write_settle -> flush -> wait write_settle
//! ```

use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort, StopBits};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace};

use scanbridge_core::constants::{
    SERIAL_OPEN_SETTLE_MS, SERIAL_RECEIVE_POLL_MS, SERIAL_RECEIVE_TIMEOUT_MS,
    SERIAL_WRITE_SETTLE_MS,
};
use scanbridge_core::{Parity, SerialSettings};

use crate::error::{HardwareError, Result};
use crate::traits::SerialChannel;

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Delays applied around serial I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialTiming {
    /// Wait after opening, before clearing buffers.
    pub open_settle: Duration,

    /// Wait after the write and again after the flush.
    pub write_settle: Duration,

    /// Upper bound for `receive`.
    pub receive_timeout: Duration,

    /// Pause between polls while receiving; also the driver read timeout.
    pub receive_poll: Duration,
}

impl Default for SerialTiming {
    fn default() -> Self {
        Self {
            open_settle: Duration::from_millis(SERIAL_OPEN_SETTLE_MS),
            write_settle: Duration::from_millis(SERIAL_WRITE_SETTLE_MS),
            receive_timeout: Duration::from_millis(SERIAL_RECEIVE_TIMEOUT_MS),
            receive_poll: Duration::from_millis(SERIAL_RECEIVE_POLL_MS),
        }
    }
}

impl SerialTiming {
    /// No settle delays at all.
    pub fn immediate() -> Self {
        Self {
            open_settle: Duration::ZERO,
            write_settle: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_open_settle(mut self, delay: Duration) -> Self {
        self.open_settle = delay;
        self
    }

    pub fn with_write_settle(mut self, delay: Duration) -> Self {
        self.write_settle = delay;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }
}

/// Port settings plus timing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SerialPortConfig {
    pub settings: SerialSettings,
    pub timing: SerialTiming,
}

impl SerialPortConfig {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            timing: SerialTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: SerialTiming) -> Self {
        self.timing = timing;
        self
    }
}

impl fmt::Display for SerialPortConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.settings.device)
    }
}

/// An open hardware serial port.
pub struct SerialPortChannel {
    device: String,
    port: Option<SharedPort>,
    timing: SerialTiming,
}

impl fmt::Debug for SerialPortChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPortChannel")
            .field("device", &self.device)
            .field("open", &self.port.is_some())
            .finish()
    }
}

fn data_bits(bits: u8) -> Result<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(HardwareError::configuration(format!("unsupported data bits: {other}"))),
    }
}

fn stop_bits(bits: u8) -> Result<StopBits> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(HardwareError::configuration(format!("unsupported stop bits: {other}"))),
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

/// Split off everything before the first NUL, dropping the NUL itself.
fn take_until_nul(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.iter().position(|&b| b == 0)?;
    let mut message: Vec<u8> = buffer.drain(..=end).collect();
    message.pop();
    Some(message)
}

impl SerialPortChannel {
    fn shared(&self) -> Result<SharedPort> {
        self.port
            .clone()
            .ok_or_else(|| HardwareError::not_open(&self.device))
    }

    /// Run a blocking port operation on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn SerialPort>) -> std::io::Result<T> + Send + 'static,
    {
        let port = self.shared()?;
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = port.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut *guard)
        })
        .await
        .map_err(|e| HardwareError::communication(format!("serial task failed: {e}")))?
        .map_err(|e| HardwareError::from_io(&device, e))
    }
}

impl SerialChannel for SerialPortChannel {
    type Config = SerialPortConfig;

    async fn open(config: SerialPortConfig) -> Result<Self> {
        let SerialPortConfig { settings, timing } = config;
        let device = settings.device.clone();
        debug!(%settings, "Opening serial port");

        let builder = serialport::new(&settings.device, settings.baud_rate)
            .data_bits(data_bits(settings.data_bits)?)
            .stop_bits(stop_bits(settings.stop_bits)?)
            .parity(parity(settings.parity))
            .flow_control(FlowControl::None)
            .timeout(timing.receive_poll);

        let open_device = device.clone();
        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| HardwareError::communication(format!("serial task failed: {e}")))?
            .map_err(|e| HardwareError::from_serial(&open_device, e))?;

        let channel = Self {
            device,
            port: Some(Arc::new(Mutex::new(port))),
            timing,
        };

        sleep(timing.open_settle).await;
        channel.blocking(|port| port.clear(ClearBuffer::All).map_err(std::io::Error::from)).await?;

        info!(%settings, "Serial port open");
        Ok(channel)
    }

    fn device(&self) -> &str {
        &self.device
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let payload = data.to_vec();
        self.blocking(move |port| port.write_all(&payload)).await?;
        sleep(self.timing.write_settle).await;
        self.blocking(|port| port.flush()).await?;
        sleep(self.timing.write_settle).await;
        trace!(device = %self.device, bytes = data.len(), "Serial write flushed");
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timing.receive_timeout;
        let mut buffer = Vec::new();

        loop {
            let chunk = self
                .blocking(|port| {
                    let available = port.bytes_to_read().map_err(std::io::Error::from)? as usize;
                    let mut chunk = vec![0u8; available];
                    if available > 0 {
                        let read = port.read(&mut chunk)?;
                        chunk.truncate(read);
                    }
                    Ok(chunk)
                })
                .await?;
            buffer.extend_from_slice(&chunk);

            if let Some(message) = take_until_nul(&mut buffer) {
                return Ok(message);
            }
            if Instant::now() >= deadline {
                return Err(HardwareError::timeout(self.timing.receive_timeout.as_millis() as u64));
            }
            sleep(self.timing.receive_poll).await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(device = %self.device, "Serial port closed");
        }
        Ok(())
    }
}
