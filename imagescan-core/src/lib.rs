//! Types and client-less behavior for the image scan admission webhook
//!
//! This crate holds the data model shared by the evaluation pipeline and the
//! webhook transport: the minimal views of the admission request and the pod,
//! scan reports, the structured input handed to policies, and the JSON Patch
//! builder that pins image references to digests.
//!
//! Nothing in here talks to a scanner, a policy engine or the Kubernetes API.
#![deny(unsafe_code)]

pub mod decision;
pub use decision::AdmissionDecision;

pub mod digest;
pub use digest::DigestMapping;

pub mod image;

pub mod input;
pub use input::EvaluationInput;

pub mod object;
pub use object::{ContainerObject, PodObject};

pub mod patch;
pub use patch::build_patch;

pub mod report;
pub use report::{ScanReport, ScanStatus};

pub mod request;
pub use request::AdmissionContext;
