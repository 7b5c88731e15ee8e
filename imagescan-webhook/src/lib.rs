//! Kubernetes admission webhook that admits pods only when their container
//! images pass a scan policy.
//!
//! The decision pipeline lives in [`imagescan_runtime`]. This crate supplies
//! its capabilities and its outer surface:
//!
//! - [`anchore::AnchoreClient`] scans images with an Anchore Engine,
//! - [`opa::OpaCli`] evaluates Rego policies with the `opa` binary,
//! - [`source::FilePolicySource`] reads rules and data from mounted files,
//! - [`server`] exposes the mutating and validating endpoints over axum.
#![deny(unsafe_code)]

pub mod anchore;
pub mod config;
pub mod opa;
pub mod pod;
pub mod review;
pub mod server;
pub mod source;

pub use config::{Cli, Config, ConfigError};
pub use review::{review, ReviewError, ReviewMode};
pub use server::{router, AppState, ServerError};
