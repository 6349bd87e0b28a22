//! Error types shared across SteadyRec crates.

use std::path::PathBuf;

/// Top-level error type for SteadyRec operations.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Writer error: {message}")]
    Writer { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Session error: {message}")]
    Session { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using RecorderError.
pub type RecorderResult<T> = Result<T, RecorderError>;

impl RecorderError {
    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn writer(msg: impl Into<String>) -> Self {
        Self::Writer {
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage {
            message: msg.into(),
        }
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
