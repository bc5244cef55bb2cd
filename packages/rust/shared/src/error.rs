//! Error types for ContactLink.
//!
//! Library crates use [`ContactLinkError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` and owns all user-facing text.

use std::path::PathBuf;

/// Top-level error type for all ContactLink operations.
#[derive(Debug, thiserror::Error)]
pub enum ContactLinkError {
    /// The request carried neither an email nor a phone number.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The contact store failed, timed out, or a merge could not settle.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A conditional store write lost a race with a concurrent merge.
    #[error("merge conflict: {0}")]
    MergeConflict(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Stored or supplied data violates a contact invariant.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ContactLinkError>;

/// Coarse classification a transport maps onto its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller error; retrying the same request will fail again.
    InvalidRequest,
    /// Collaborator failure; the caller may retry later.
    StorageUnavailable,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// HTTP-style status code for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::StorageUnavailable => 503,
            Self::Internal => 500,
        }
    }
}

impl ContactLinkError {
    /// Create an invalid-request error from any displayable message.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the engine may transparently retry the failed step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MergeConflict(_))
    }

    /// Classify this error for a transport layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            // A conflict that escapes the engine means retries ran out.
            Self::StorageUnavailable(_) | Self::MergeConflict(_) => ErrorKind::StorageUnavailable,
            Self::Config { .. } | Self::Io { .. } | Self::Validation { .. } => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ContactLinkError::invalid_request("email or phoneNumber required");
        assert_eq!(
            err.to_string(),
            "invalid request: email or phoneNumber required"
        );

        let err = ContactLinkError::StorageUnavailable("store call timed out".into());
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn only_merge_conflicts_are_retryable() {
        assert!(ContactLinkError::MergeConflict("lost race".into()).is_retryable());
        assert!(!ContactLinkError::StorageUnavailable("down".into()).is_retryable());
        assert!(!ContactLinkError::invalid_request("empty").is_retryable());
    }

    #[test]
    fn kinds_map_to_status_codes() {
        assert_eq!(
            ContactLinkError::invalid_request("x").kind().status_code(),
            400
        );
        assert_eq!(
            ContactLinkError::StorageUnavailable("x".into())
                .kind()
                .status_code(),
            503
        );
        assert_eq!(ContactLinkError::validation("x").kind(), ErrorKind::Internal);
    }
}
