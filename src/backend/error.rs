//! Error types for storage backends

use thiserror::Error;

/// Result type for backend operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage backend error types
#[derive(Debug, Error)]
pub enum StorageError {
    /// Caller violated a precondition (missing key, non-object argument)
    #[error("{0}")]
    Usage(String),

    /// Failure while preparing remote storage for a new file
    #[error("failed to prepare storage: {0}")]
    UploadPrep(String),

    /// Failure uploading a single chunk
    #[error("failed to upload chunk: {0}")]
    Upload(String),

    /// Failure downloading a single chunk, including "no attachment found"
    #[error("failed to download chunk: {0}")]
    Download(String),

    /// Failure deleting a single remote chunk
    #[error("failed to delete chunk: {0}")]
    Delete(String),

    /// No driver is registered for the requested platform tag
    #[error("unsupported storage platform: {0}")]
    UnsupportedPlatform(String),

    /// The backend configuration failed validation
    #[error("invalid backend configuration:\n{report}")]
    ConfigInvalid { report: String },
}

impl StorageError {
    pub fn usage(message: impl Into<String>) -> Self {
        StorageError::Usage(message.into())
    }

    pub fn upload_prep(message: impl Into<String>) -> Self {
        StorageError::UploadPrep(message.into())
    }

    pub fn upload(message: impl Into<String>) -> Self {
        StorageError::Upload(message.into())
    }

    pub fn download(message: impl Into<String>) -> Self {
        StorageError::Download(message.into())
    }

    pub fn delete(message: impl Into<String>) -> Self {
        StorageError::Delete(message.into())
    }
}
