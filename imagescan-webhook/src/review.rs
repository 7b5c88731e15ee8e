//! Admission review handling for the mutating and validating endpoints
use imagescan_core::build_patch;
use imagescan_runtime::AdmissionEvaluator;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse},
    DynamicObject,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::pod;

/// A request the webhook cannot evaluate.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// The request is for another resource than pods.
    #[error("expected resource to be v1/pods, got {0}")]
    WrongResource(String),

    /// The request carries no object.
    #[error("Pod data is <nil>")]
    MissingObject,

    /// The object is not a valid pod.
    #[error("failed to decode pod: {0}")]
    DecodePod(#[source] serde_json::Error),

    /// The request could not be handed to policies.
    #[error("failed to encode admission request: {0}")]
    EncodeRequest(#[source] serde_json::Error),
}

/// Which endpoint received the review.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewMode {
    /// Pin images to digests on admission.
    Mutate,
    /// Only admit or reject.
    Validate,
}

/// Evaluate an admission request and build the response.
///
/// Rejections carry the deny reasons joined by newlines. Admissions on the
/// mutating endpoint carry a JSON Patch, possibly empty.
pub async fn review(
    evaluator: &AdmissionEvaluator,
    req: &AdmissionRequest<DynamicObject>,
    mode: ReviewMode,
    cancel: &CancellationToken,
) -> AdmissionResponse {
    let res = AdmissionResponse::from(req);
    let (context, pod) = match pod::extract(req) {
        Ok(extracted) => extracted,
        Err(err) => {
            warn!(uid = %req.uid, error = %err, "cannot evaluate admission request");
            return res.deny(err);
        }
    };
    info!(
        uid = %req.uid,
        pod = %pod.display_name(),
        operation = ?req.operation,
        ?mode,
        "evaluating pod admission"
    );

    let decision = evaluator.evaluate(&context, &pod, cancel).await;
    if !decision.accepted {
        let reasons = decision.message();
        info!(uid = %req.uid, pod = %pod.display_name(), %reasons, "pod rejected");
        return res.deny(reasons);
    }
    info!(uid = %req.uid, pod = %pod.display_name(), "pod accepted");

    match mode {
        ReviewMode::Validate => res,
        ReviewMode::Mutate => {
            let patch = build_patch(&pod, &decision.digests);
            match res.clone().with_patch(patch) {
                Ok(res) => res,
                Err(err) => {
                    warn!(uid = %req.uid, error = %err, "cannot serialize patch");
                    res.deny(err)
                }
            }
        }
    }
}
