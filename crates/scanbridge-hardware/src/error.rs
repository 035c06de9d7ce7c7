//! Error types for serial device operations.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur while talking to a serial device.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// Device is not present or went away.
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// Operation timed out after specified duration.
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Operation on a channel that is not open.
    #[error("Channel not open: {device}")]
    NotOpen { device: String },

    /// Device communication error.
    #[error("Communication error: {message}")]
    CommunicationError { message: String },

    /// Port parameters the driver rejected.
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn not_open(device: impl Into<String>) -> Self {
        Self::NotOpen {
            device: device.into(),
        }
    }

    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationError {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Map an I/O error from `device`, treating a vanished port as a disconnect.
    pub fn from_io(device: &str, error: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match error.kind() {
            ErrorKind::NotFound | ErrorKind::BrokenPipe | ErrorKind::NotConnected => {
                Self::disconnected(device)
            }
            _ => Self::Io(error),
        }
    }

    /// Map a `serialport` driver error from `device`.
    pub fn from_serial(device: &str, error: serialport::Error) -> Self {
        match error.kind() {
            serialport::ErrorKind::NoDevice => Self::disconnected(device),
            serialport::ErrorKind::InvalidInput => Self::configuration(error.to_string()),
            serialport::ErrorKind::Io(kind) => Self::from_io(device, std::io::Error::new(kind, error.description)),
            _ => Self::communication(error.to_string()),
        }
    }
}
