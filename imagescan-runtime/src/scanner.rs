//! The image scanning backend capability
use std::time::Duration;

use async_trait::async_trait;
use imagescan_core::ScanReport;
use thiserror::Error;

/// Type-erased error of a scanner backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a scanner call, or of the retry loop driving it.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The backend accepted the image but has not resolved its digest yet.
    #[error("digest for image {0} is not available yet")]
    DigestPending(String),

    /// A backend failure that may go away on its own (timeouts, 5xx).
    #[error("transient scanner failure: {0}")]
    Transient(#[source] BoxError),

    /// A backend failure that retrying will not fix.
    #[error("scanner failure: {0}")]
    Backend(#[source] BoxError),

    /// Every allowed attempt failed with a retryable error.
    #[error("scan did not complete after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of calls made.
        attempts: usize,
        /// Error of the last call.
        #[source]
        last: Box<ScanError>,
    },

    /// The per-lookup wall-clock budget ran out.
    #[error("scan deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The caller gave up on the request.
    #[error("scan cancelled")]
    Cancelled,
}

impl ScanError {
    /// Wrap a failure that should be retried.
    pub fn transient(err: impl Into<BoxError>) -> Self {
        Self::Transient(err.into())
    }

    /// Wrap a failure that should not be retried.
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DigestPending(_) | Self::Transient(_))
    }
}

/// An image scanning backend.
///
/// `start_scan` registers the image and resolves its content digest, which the
/// backend may report as pending for a while; `get_report` fetches the verdict
/// for a resolved digest, optionally against a named backend policy.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Register `image` for scanning and return its digest.
    async fn start_scan(&self, image: &str) -> Result<String, ScanError>;

    /// Fetch the scan report of `image` at `digest`.
    async fn get_report(
        &self,
        image: &str,
        digest: &str,
        policy_id: Option<&str>,
    ) -> Result<ScanReport, ScanError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_and_transient_errors_are_retryable() {
        assert!(ScanError::DigestPending("nginx".into()).is_retryable());
        assert!(ScanError::transient("503").is_retryable());
        assert!(!ScanError::backend("401").is_retryable());
        assert!(!ScanError::Cancelled.is_retryable());
        assert!(!ScanError::DeadlineExceeded(Duration::from_secs(1)).is_retryable());
        let exhausted = ScanError::RetriesExhausted {
            attempts: 5,
            last: Box::new(ScanError::DigestPending("nginx".into())),
        };
        assert!(!exhausted.is_retryable());
        assert_eq!(
            exhausted.to_string(),
            "scan did not complete after 5 attempts: digest for image nginx is not available yet"
        );
    }
}
