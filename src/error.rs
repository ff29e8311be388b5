//! Worker Error Types

use thiserror::Error;

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Worker error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Replica store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Failed to apply {stream} batch: {reason}")]
    Apply { stream: String, reason: String },

    #[error("Inconsistent {stream} batch: {reason}")]
    Inconsistent { stream: String, reason: String },

    // Replication transport errors
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Bad response from {url} (status {status:?}): {reason}")]
    Protocol {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    // Notification errors
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

/// Coarse classification attached to replication failure logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connection refused, timeout, TLS failure
    Transport,
    /// Non-success status, unparsable body, missing fields
    Protocol,
    /// The replica store rejected a batch
    Apply,
    /// Notifying application services failed
    Dispatch,
    /// Anything the loop cannot recover from
    Fatal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transport => "transport",
            FailureClass::Protocol => "protocol",
            FailureClass::Apply => "apply",
            FailureClass::Dispatch => "dispatch",
            FailureClass::Fatal => "fatal",
        }
    }
}

impl Error {
    /// Classify this error for the replication loop
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Error::Transport { .. } | Error::Timeout(_) | Error::Network(_) => {
                FailureClass::Transport
            }
            Error::Protocol { .. } => FailureClass::Protocol,
            Error::Apply { .. } | Error::Inconsistent { .. } | Error::Store(_) => {
                FailureClass::Apply
            }
            Error::Dispatch(_) => FailureClass::Dispatch,
            Error::Config(_) | Error::ConfigParse(_) | Error::Io(_) | Error::ShuttingDown => {
                FailureClass::Fatal
            }
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(format!("SQLite error: {}", e))
    }
}
