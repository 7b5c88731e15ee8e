//! Scanning one image: digest resolution with retries, then the report
use std::sync::Arc;

use imagescan_core::ScanReport;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{RetryPolicy, Scanner};

/// Result of scanning one image.
///
/// A report is always present; when the backend could not produce one it
/// carries a sentinel status. `digest` is set whenever the digest resolved,
/// even if the report could not be fetched afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanOutcome {
    /// Verdict to hand to the container policy.
    pub report: ScanReport,
    /// Resolved content digest.
    pub digest: Option<String>,
}

/// Drives a [`Scanner`] under a [`RetryPolicy`].
#[derive(Clone)]
pub struct ScanCoordinator {
    scanner: Arc<dyn Scanner>,
    retry: RetryPolicy,
}

impl ScanCoordinator {
    /// Coordinate `scanner` with the given retry policy.
    pub fn new(scanner: Arc<dyn Scanner>, retry: RetryPolicy) -> Self {
        Self { scanner, retry }
    }

    /// Resolve the digest of `image`, retrying while the backend reports it
    /// as pending. Failures are logged and yield `None`.
    pub async fn resolve(&self, image: &str, cancel: &CancellationToken) -> Option<String> {
        let res = self
            .retry
            .run(cancel, |attempt| {
                debug!(image, attempt, "starting scan");
                self.scanner.start_scan(image)
            })
            .await;
        match res {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!(image, error = %err, "start scan failed");
                None
            }
        }
    }

    /// Scan `image`, evaluating the backend report against `policy_id`.
    ///
    /// A failed digest resolution yields a `scan_failed` report; a failed
    /// report fetch yields a `report_not_available` report.
    pub async fn scan(
        &self,
        image: &str,
        policy_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> ScanOutcome {
        let Some(digest) = self.resolve(image, cancel).await else {
            return ScanOutcome {
                report: ScanReport::scan_failed(image),
                digest: None,
            };
        };
        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(crate::ScanError::Cancelled),
            res = self.scanner.get_report(image, &digest, policy_id) => res,
        };
        let report = match fetched {
            Ok(report) => report,
            Err(err) => {
                warn!(image, %digest, error = %err, "get scan report failed");
                ScanReport::not_available(image)
            }
        };
        ScanOutcome {
            report,
            digest: Some(digest),
        }
    }
}
