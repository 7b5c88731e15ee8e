//! Structured input handed to the policy evaluator
use serde::Serialize;

use crate::{AdmissionContext, ContainerObject, PodObject, ScanReport};

/// Input of one policy evaluation.
///
/// Which fields are null tells policy authors the phase: the pre-scan gate
/// sees no `ScanReport` and no `ContainerObject`, per-container evaluation
/// sees both.
#[derive(Serialize, Clone, Debug)]
pub struct EvaluationInput<'a> {
    /// Scan verdict of the container, `None` before scanning.
    #[serde(rename = "ScanReport")]
    pub scan_report: Option<&'a ScanReport>,
    /// The raw admission request.
    #[serde(rename = "AdmissionRequest")]
    pub admission_request: &'a serde_json::Value,
    /// The raw pod.
    #[serde(rename = "PodObject")]
    pub pod: &'a serde_json::Value,
    /// The raw container, `None` for pod-level evaluation.
    #[serde(rename = "ContainerObject")]
    pub container: Option<&'a serde_json::Value>,
}

impl<'a> EvaluationInput<'a> {
    /// Input for the pod-level pre-scan queries.
    pub fn pre_scan(request: &'a AdmissionContext, pod: &'a PodObject) -> Self {
        Self {
            scan_report: None,
            admission_request: &request.raw,
            pod: &pod.raw,
            container: None,
        }
    }

    /// Input for the per-container query.
    pub fn container(
        request: &'a AdmissionContext,
        pod: &'a PodObject,
        container: &'a ContainerObject,
        report: &'a ScanReport,
    ) -> Self {
        Self {
            scan_report: Some(report),
            admission_request: &request.raw,
            pod: &pod.raw,
            container: Some(&container.raw),
        }
    }
}
