//! Anchore Engine scanner adapter
//!
//! Image registration goes through `POST /images`, which answers with the
//! image record once the digest is known; an empty answer means the engine is
//! still fetching the manifest and the call should be repeated. Verdicts come
//! from `GET /images/<digest>/check`, where a `pass` status maps to
//! [`ScanStatus::Accepted`](imagescan_core::ScanStatus::Accepted) and anything
//! else to `Rejected`.
mod client;
pub use client::{AnchoreBody, AnchoreClient, AnchoreError};

mod types;
pub use types::PolicyCheck;
