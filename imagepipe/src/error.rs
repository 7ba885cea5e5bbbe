//! Error taxonomy for image loading.
//!
//! Three kinds of failure reach callers: local cancellation (synthesized by
//! the state machine, never reported by a loader), an unknown failure (the
//! loader reported failure without an error value), and an underlying
//! transport/decode error passed through unmodified with its cause
//! preserved.
//!
//! All failures are terminal for their task; the manager never retries.
//! Retry, if desired, is the caller's responsibility (create a new task).

use std::sync::Arc;

use thiserror::Error;

/// Domain identifier attached to every [`ImageError`].
pub const ERROR_DOMAIN: &str = "imagepipe.manager";

/// Reserved code for locally-synthesized cancellation failures.
pub const ERROR_CODE_CANCELLED: i32 = -1;

/// Reserved code for loader failures that carried no error value.
pub const ERROR_CODE_UNKNOWN: i32 = -2;

/// Type-erased error reported by a loader.
pub type LoadFailure = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Why an image load failed.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    /// The task was cancelled before it completed.
    #[error("the image load was cancelled")]
    Cancelled,

    /// The loader reported failure without an error value.
    #[error("the image load failed for an unknown reason")]
    Unknown,

    /// The loader reported an underlying transport/decode error.
    ///
    /// The original cause is preserved verbatim and reachable through
    /// [`ImageError::cause`]. (`Arc<dyn Error>` does not implement `Error`,
    /// so the cause cannot be exposed as a `source`.)
    #[error("image loading failed: {message}")]
    Load {
        /// Rendered message of the underlying error.
        message: String,
        /// The underlying error, unmodified.
        cause: LoadFailure,
    },
}

impl ImageError {
    /// Wraps an already type-erased loader error.
    pub fn load(cause: LoadFailure) -> Self {
        Self::Load {
            message: cause.to_string(),
            cause,
        }
    }

    /// Wraps a concrete loader error.
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::load(Arc::new(error))
    }

    /// The error domain identifier.
    pub fn domain(&self) -> &'static str {
        ERROR_DOMAIN
    }

    /// The reserved code for locally-synthesized errors, or `None` when the
    /// failure carries an underlying error instead.
    pub fn code(&self) -> Option<i32> {
        match self {
            ImageError::Cancelled => Some(ERROR_CODE_CANCELLED),
            ImageError::Unknown => Some(ERROR_CODE_UNKNOWN),
            ImageError::Load { .. } => None,
        }
    }

    /// The underlying cause, if the loader reported one.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            ImageError::Load { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }

    /// Returns true if this failure is a local cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ImageError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_reserved_codes() {
        assert_eq!(ImageError::Cancelled.code(), Some(ERROR_CODE_CANCELLED));
        assert_eq!(ImageError::Unknown.code(), Some(ERROR_CODE_UNKNOWN));
        let underlying = ImageError::from_error(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(underlying.code(), None);
    }

    #[test]
    fn test_domain() {
        assert_eq!(ImageError::Cancelled.domain(), ERROR_DOMAIN);
        assert_eq!(ImageError::Unknown.domain(), ERROR_DOMAIN);
    }

    #[test]
    fn test_cause_preserved() {
        let error = ImageError::from_error(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
        let cause = error.cause().expect("underlying cause");
        assert!(cause.to_string().contains("timed out"));
        assert!(ImageError::Cancelled.cause().is_none());
        assert!(ImageError::Unknown.cause().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ImageError::Cancelled.to_string(),
            "the image load was cancelled"
        );
        let error = ImageError::from_error(io::Error::new(io::ErrorKind::Other, "dns failure"));
        assert!(error.to_string().contains("dns failure"));
    }

    #[test]
    fn test_is_cancellation() {
        assert!(ImageError::Cancelled.is_cancellation());
        assert!(!ImageError::Unknown.is_cancellation());
    }
}
