//! Error types and handling.

use thiserror::Error;

use crate::wire::CodecError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Device communication timeout
    #[error("Device timeout: {0}")]
    DeviceTimeout(String),

    /// Data parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// TCP connection failed
    #[error("TCP connection failed: {0}")]
    TcpConnectionFailed(String),

    /// Framing error (bad start byte, malformed fields, oversized frame)
    #[error("TCP protocol error: {0}")]
    Codec(#[from] CodecError),

    /// Every slot of a session pool is taken; try again later
    #[error("No free {0} session available")]
    NoFreeSession(&'static str),

    /// No device registered under this name
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Request needs a session token but the device has not logged in yet
    #[error("Device {0} is not logged in")]
    NotLoggedIn(String),

    /// Stop was requested while waiting on the network
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Create a parse error with message
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a config error with message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error with message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the device simply did not answer (retrying may help).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::DeviceTimeout(_) | Self::TcpConnectionFailed(_) | Self::Io(_) | Self::Cancelled
        )
    }
}
