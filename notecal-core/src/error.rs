//! Error types for notecal.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in notecal operations.
#[derive(Error, Debug)]
pub enum CalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frontmatter error in {path}: {message}")]
    Frontmatter { path: PathBuf, message: String },

    #[error("File watcher error: {0}")]
    Watch(String),

    #[error("Failed to write {path}: {message}")]
    StorageWrite { path: PathBuf, message: String },

    #[error("Note no longer exists: {}", .0.display())]
    StaleReference(PathBuf),

    #[error("Registry error: {0}")]
    Registry(String),
}

impl From<notify::Error> for CalError {
    fn from(err: notify::Error) -> Self {
        CalError::Watch(err.to_string())
    }
}

/// Result type alias for notecal operations.
pub type CalResult<T> = Result<T, CalError>;
