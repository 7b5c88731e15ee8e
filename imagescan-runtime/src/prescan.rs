//! Pod-level policy gate evaluated before any scanning
use imagescan_core::{AdmissionContext, EvaluationInput, PodObject};
use tracing::{debug, info};

use crate::{
    policy::{ALLOW_POD_QUERY, DENY_POD_QUERY},
    PolicyGateway, PolicyOutcome,
};

/// Verdict of the pre-scan gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreScanOutcome {
    /// Admit without scanning.
    Allowed,
    /// Reject without scanning, with the rule messages joined by `", "`.
    Rejected(String),
    /// No verdict; scan every container.
    Indecisive,
}

/// Runs the allow and deny pre-scan queries.
#[derive(Clone)]
pub struct PreScanGate {
    gateway: PolicyGateway,
}

impl PreScanGate {
    /// A gate evaluating through `gateway`.
    pub fn new(gateway: PolicyGateway) -> Self {
        Self { gateway }
    }

    /// Evaluate the gate for one pod.
    ///
    /// The allow query is asked first; if it produces messages the pod is
    /// allowed. An engine failure of the allow query rejects the pod, while an
    /// undefined or oddly shaped allow result is ignored. Otherwise messages
    /// (or any failure) of the deny query reject it.
    pub async fn evaluate(
        &self,
        request: &AdmissionContext,
        pod: &PodObject,
        rules: &str,
        data: &str,
    ) -> PreScanOutcome {
        let input = EvaluationInput::pre_scan(request, pod);

        match self.gateway.evaluate(ALLOW_POD_QUERY, rules, data, &input).await {
            PolicyOutcome::Violations(msgs) => {
                info!(uid = %request.uid, reasons = ?msgs, "pre-scan allowed pod");
                return PreScanOutcome::Allowed;
            }
            PolicyOutcome::Engine(msg) => return PreScanOutcome::Rejected(msg),
            PolicyOutcome::Malformed(msg) => {
                debug!(uid = %request.uid, reason = %msg, "ignoring pre-scan allow result");
            }
            PolicyOutcome::Clean => {}
        }

        let denied = self
            .gateway
            .evaluate(DENY_POD_QUERY, rules, data, &input)
            .await
            .into_violations();
        if denied.is_empty() {
            PreScanOutcome::Indecisive
        } else {
            PreScanOutcome::Rejected(denied.join(", "))
        }
    }
}
