//! Error types for minidfs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    // === Request Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // === Network Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Malformed response: {0}")]
    Protocol(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Coordinator error: {0}")]
    Remote(String),

    // === Replication Errors ===
    #[error("Block {block} unavailable (primary {primary}, backup {backup}): {reason}")]
    BlockUnavailable {
        block: usize,
        primary: String,
        backup: String,
        reason: String,
    },

    // === Metadata Errors ===
    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Fatal: {0}")]
    Fatal(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Can the operation be retried against another replica?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ShortRead { .. }
                | Error::NotFound(_)
                | Error::ConnectionFailed(_)
                | Error::Protocol(_)
                | Error::Timeout(_)
        )
    }

    /// Should this error take the daemon down at startup?
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Fatal(_) | Error::InvalidConfig(_) | Error::MetadataCorrupted(_)
        )
    }
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
