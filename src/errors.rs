use thiserror::Error;

use crate::auth::Capability;

/// Error taxonomy for store operations.
///
/// Every failure surfaces as a stable machine-readable kind plus a human
/// message; a caller never receives a "success" with undefined fields.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("permission denied: '{required}' capability required")]
    Authorization { required: Capability },

    #[error("permission denied: only the submitter or an admin may modify this request")]
    NotOwner,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("request not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable error code for structured reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation_error",
            AppError::Authorization { .. } => "authorization_error",
            AppError::NotOwner => "authorization_error",
            AppError::Conflict(_) => "conflict_error",
            AppError::NotFound => "not_found",
            AppError::Database(_) => "transient_store_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Whether the caller may retry the operation.
    ///
    /// A lost decision race is safe to retry once (re-read, then re-decide);
    /// a transient store failure may be retried with backoff. Authorization
    /// and validation failures are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_) | AppError::Database(_))
    }
}
