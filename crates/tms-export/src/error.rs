//! Error types for export operations.

use thiserror::Error;

/// Export-specific errors.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Failed to authenticate with the source product.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Project not found on the source product.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// A resource requested from the source product does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded, retry after {0} seconds")]
    RateLimitExceeded(u64),

    /// Network error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A vendor payload could not be understood.
    #[error("Unexpected {what} payload: {reason}")]
    InvalidPayload { what: String, reason: String },

    /// Writing the export failed.
    #[error("Export store error: {0}")]
    Store(#[from] tms_models::ModelError),
}

impl ExportError {
    pub(crate) fn payload(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidPayload {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for export operations.
pub type Result<T> = std::result::Result<T, ExportError>;
