//! Aggregated outcome of one admission evaluation
use crate::DigestMapping;

/// The admission decision together with everything the transport needs to
/// answer the API server.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdmissionDecision {
    /// Whether the pod is admitted.
    pub accepted: bool,
    /// Digests resolved while evaluating, for every container that got one.
    pub digests: DigestMapping,
    /// Human readable rejection reasons, in evaluation order.
    pub deny_reasons: Vec<String>,
}

impl AdmissionDecision {
    /// Admit without any digest information.
    pub fn allow() -> Self {
        Self {
            accepted: true,
            ..Default::default()
        }
    }

    /// Reject with a single reason.
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            digests: DigestMapping::new(),
            deny_reasons: vec![reason.into()],
        }
    }

    /// Reasons joined for the `status.message` of the admission response.
    pub fn message(&self) -> String {
        self.deny_reasons.join("\n")
    }
}
