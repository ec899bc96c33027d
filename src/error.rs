//! Error types for mediachunk

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local input could not be read or decoded
    #[error("Failed to read media: {0}")]
    ReadError(String),

    /// Input exceeds the encoding ceiling
    #[error("Media too large: ~{estimated} bytes (limit {limit} bytes)")]
    SizeExceeded { estimated: u64, limit: u64 },

    /// A manifest or fragment write failed during upload
    #[error("Store write failed for media {media_id} after {written} fragments: {message}")]
    StoreWrite {
        media_id: String,
        written: usize,
        message: String,
    },

    #[error("Store read failed for {key}: {message}")]
    StoreRead { key: String, message: String },

    /// Raw failure reported by a document store backend
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Invalid media reference: {0}")]
    InvalidReference(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an internal error from any displayable value
    pub fn custom<T: std::fmt::Display>(msg: T) -> Self {
        Error::Internal(msg.to_string())
    }

    /// Whether retrying the same store operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Backend(_) | Error::Timeout(_) | Error::Io(_) | Error::Sled(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Deserialization(e.to_string())
    }
}

/// Outcome of a failed media resolution
///
/// Cloneable so a single in-flight fetch can report the same failure to
/// every caller waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fragment read failed for {key}: {message}")]
    StoreRead { key: String, message: String },

    #[error("Media {0} does not exist")]
    NotFound(String),

    /// The manifest is still marked pending; fragments are being written
    #[error("Media {id} is still uploading ({present}/{declared} fragments present)")]
    UploadPending {
        id: String,
        present: usize,
        declared: usize,
    },

    /// The manifest claims to be complete but fragments are gone
    #[error("Media {id} is missing fragments {missing:?}")]
    MissingFragments { id: String, missing: Vec<usize> },

    #[error("Media {id} failed integrity check")]
    Integrity { id: String },

    /// The manifest declares a shape no upload could have produced
    #[error("Media {id} has an invalid manifest: {reason}")]
    InvalidManifest { id: String, reason: String },

    #[error("Failed to decode media payload: {0}")]
    Decode(String),

    #[error("Resolution task aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// True for states a consumer should render as "still loading" and retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::UploadPending { .. } | FetchError::StoreRead { .. } | FetchError::Aborted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_is_retryable() {
        let pending = FetchError::UploadPending {
            id: "m".to_string(),
            present: 3,
            declared: 5,
        };
        let missing = FetchError::MissingFragments {
            id: "m".to_string(),
            missing: vec![3, 4],
        };

        assert!(pending.is_retryable());
        assert!(!missing.is_retryable());
    }

    #[test]
    fn test_fetch_error_converts() {
        let err: Error = FetchError::NotFound("abc".to_string()).into();
        assert!(matches!(err, Error::Fetch(FetchError::NotFound(_))));
        assert_eq!(err.to_string(), "Media abc does not exist");
    }
}
