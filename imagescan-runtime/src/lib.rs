//! Admission evaluation pipeline for the image scan webhook
//!
//! The pipeline takes an admission request and its pod, runs the optional
//! pre-scan policy gate, scans every container image with bounded retries,
//! evaluates the per-container policy against each scan report and folds the
//! results into one [`AdmissionDecision`](imagescan_core::AdmissionDecision).
//!
//! The scanning backend and the policy engine are capabilities injected through
//! the [`Scanner`] and [`PolicyEvaluator`] traits; the rule and data documents
//! are read through a [`PolicySource`] on every evaluation so that edits take
//! effect without a restart.
//!
//! Most users want [`AdmissionEvaluator`], which wires all stages together.
#![deny(unsafe_code)]

pub mod aggregator;
pub use aggregator::EvaluationAggregator;

pub mod coordinator;
pub use coordinator::{ScanCoordinator, ScanOutcome};

pub mod evaluator;
pub use evaluator::AdmissionEvaluator;

pub mod policy;
pub use policy::{
    Expression, PolicyError, PolicyEvaluator, PolicyGateway, PolicyOutcome, PolicySource, ResultSet,
    SourceError, StaticPolicySource,
};

pub mod prescan;
pub use prescan::{PreScanGate, PreScanOutcome};

pub mod retry;
pub use retry::RetryPolicy;

pub mod scanner;
pub use scanner::{ScanError, Scanner};

#[cfg(test)] pub(crate) mod test_utils;
