//! Error types for import operations.

use thiserror::Error;

/// Import-specific errors.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Failed to authenticate with Test IT.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The target project does not exist.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// A resource requested from Test IT does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Network error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The project has no root section to import under.
    #[error("Project {0} has no root section")]
    MissingRootSection(String),

    /// Reading the export failed.
    #[error("Export store error: {0}")]
    Store(#[from] tms_models::ModelError),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for import operations.
pub type Result<T> = std::result::Result<T, ImportError>;
