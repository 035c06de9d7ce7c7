use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid {role} endpoint: {}", .issues.join("; "))]
    InvalidEndpoint { role: String, issues: Vec<String> },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unknown scanner role: {0}")]
    UnknownRole(String),

    // Wire format errors
    #[error("Line too long: {size} bytes (max {max_size})")]
    LineTooLong { size: usize, max_size: usize },

    #[error("Malformed discovery response: {0}")]
    MalformedResponse(String),

    // Notification errors
    #[error("Event channel closed")]
    EventChannelClosed,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
