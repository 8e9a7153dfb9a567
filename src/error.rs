//! MirrorSync Error Types

use thiserror::Error;

/// Result type alias for MirrorSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// MirrorSync error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Connectivity errors
    #[error("Connection failed to {address}: {reason}")]
    Connectivity { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectTimeout(String),

    #[error("Transfer from {0} stalled: no data within the idle timeout")]
    IdleTimeout(String),

    // Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unexpected status {status} from {address}")]
    UnexpectedStatus { address: String, status: u16 },

    #[error("Transfer truncated: received {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Store errors
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    // Role / lifecycle errors
    #[error("Operation forbidden: {0}")]
    Forbidden(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Node not running: {0}")]
    NodeNotRunning(String),

    // Download errors
    #[error("All candidates failed for {filename}: {attempted} endpoints tried, {bytes_preserved} bytes preserved")]
    ExhaustedFailover {
        filename: String,
        attempted: usize,
        bytes_preserved: u64,
    },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error should advance the failover loop to the next
    /// candidate (as opposed to aborting the whole download session)
    pub fn is_transfer_failure(&self) -> bool {
        matches!(
            self,
            Error::Connectivity { .. }
                | Error::ConnectTimeout(_)
                | Error::IdleTimeout(_)
                | Error::Protocol(_)
                | Error::UnexpectedStatus { .. }
                | Error::Truncated { .. }
                | Error::Http(_)
                | Error::NotFound(_)
        )
    }
}
