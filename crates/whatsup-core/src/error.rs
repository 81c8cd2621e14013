//! Error types for Whatsup.

use thiserror::Error;

/// Unified error type for all Whatsup crates.
#[derive(Error, Debug)]
pub enum WhatsupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Search error: {0}")]
    Search(String),

    /// Bad user input. The message is shown to the user verbatim.
    #[error("{0}")]
    Validation(String),

    /// Lookup miss (unknown watch, unknown help topic). Shown verbatim.
    #[error("{0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl WhatsupError {
    /// True when the transport session is gone and must be rebuilt.
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, WhatsupError::ConnectionLost(_))
    }

    /// True for errors that are answered to the user and never logged as failures.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, WhatsupError::Validation(_) | WhatsupError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, WhatsupError>;
