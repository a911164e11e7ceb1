//! Error types for yaytsa-ap
//!
//! Cancellation is a distinct variant so callers can treat superseded loads
//! and aborted plays as non-fatal (see [`Error::is_cancelled`]).

use thiserror::Error;

/// Main error type for yaytsa-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Operation was superseded by a newer one
    #[error("Operation cancelled")]
    Cancelled,

    /// Seek target is negative or not finite
    #[error("Invalid position: {0}")]
    InvalidPosition(f64),

    /// Seamless switch requested without a pending preload
    #[error("Nothing preloaded")]
    NothingPreloaded,

    /// Control method called after dispose
    #[error("Audio engine has been disposed")]
    Disposed,

    /// Source could not be fetched or decoded (message sanitized)
    #[error("Load error: {0}")]
    Load(String),

    /// Playback could not be started
    #[error("Playback error: {0}")]
    Playback(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Mixer graph misuse (unknown node, bad port, closed graph)
    #[error("Audio graph error: {0}")]
    Graph(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for superseded operations, which are not failures
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<yaytsa_common::Error> for Error {
    fn from(e: yaytsa_common::Error) -> Self {
        match e {
            yaytsa_common::Error::Io(e) => Error::Io(e),
            yaytsa_common::Error::Config(msg) => Error::Config(msg),
            other => Error::Internal(other.to_string()),
        }
    }
}

/// Convenience Result type using yaytsa-ap Error
pub type Result<T> = std::result::Result<T, Error>;
