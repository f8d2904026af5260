//! Error types for configuration store operations

use std::fmt;
use std::path::PathBuf;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while loading or saving a configuration
#[derive(Debug)]
pub enum StoreError {
    /// No configuration has been saved yet
    NotFound(PathBuf),

    /// I/O error (file access, directory creation, etc.)
    Io(std::io::Error),

    /// The saved configuration could not be encoded or decoded
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(path) => {
                write!(f, "no saved configuration at {}", path.display())
            }
            StoreError::Io(err) => write!(f, "I/O error: {}", err),
            StoreError::Serialization(msg) => write!(f, "configuration serialization error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
