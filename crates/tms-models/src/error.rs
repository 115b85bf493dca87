//! Error types for the common schema and its on-disk store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading or writing an export directory.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The export directory does not contain a `main.json`.
    #[error("Export root not found: {0}")]
    RootNotFound(PathBuf),

    /// An entity file referenced by the root is missing.
    #[error("Entity file not found: {0}")]
    EntityNotFound(PathBuf),

    /// An attachment name that cannot be stored.
    #[error("Invalid attachment name: {0:?}")]
    InvalidAttachmentName(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
