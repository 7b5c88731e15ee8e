//! Scan verdicts as seen by policies
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of scanning one image.
///
/// The last two variants never come from a scanner; they are synthesized
/// locally when the backend could not produce a verdict, so that policies
/// decide whether an infrastructure failure blocks the container.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// The scanner's own policy passed the image.
    Accepted,
    /// The scanner's own policy failed the image.
    Rejected,
    /// The image could not be registered or its digest could not be resolved.
    ScanFailed,
    /// The digest was resolved but no report could be fetched.
    ReportNotAvailable,
}

/// Scan report for one container image.
///
/// Field names are serialized in the shape policy authors already match on
/// (`input.ScanReport.Status == "accepted"`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScanReport {
    /// The image reference exactly as written in the container spec.
    #[serde(rename = "ImageAndTag")]
    pub image: String,
    /// The verdict.
    #[serde(rename = "Status")]
    pub status: ScanStatus,
    /// Scanner policy the verdict was computed against, if any.
    #[serde(rename = "PolicyId", default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    /// Backend specific detail, passed through untouched.
    #[serde(rename = "InnerReport", default)]
    pub detail: Value,
}

impl ScanReport {
    /// A report carrying a verdict and no backend detail.
    pub fn new(image: impl Into<String>, status: ScanStatus) -> Self {
        Self {
            image: image.into(),
            status,
            policy_id: None,
            detail: Value::Null,
        }
    }

    /// Sentinel report for an image whose digest could not be resolved.
    pub fn scan_failed(image: impl Into<String>) -> Self {
        Self::new(image, ScanStatus::ScanFailed)
    }

    /// Sentinel report for an image whose report could not be fetched.
    pub fn not_available(image: impl Into<String>) -> Self {
        Self::new(image, ScanStatus::ReportNotAvailable)
    }

    /// Attach the scanner policy id.
    #[must_use]
    pub fn with_policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }

    /// Attach backend detail.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}
