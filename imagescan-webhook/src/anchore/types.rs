use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /images`.
#[derive(Serialize, Debug)]
pub(crate) struct AddImage<'a> {
    pub tag: &'a str,
}

/// One image record of a `/images` response.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImageInfo {
    #[serde(default)]
    pub image_digest: String,
}

/// One policy evaluation of an image, as found in a `/check` response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PolicyCheck {
    /// `pass` or `fail`.
    #[serde(rename = "Status", alias = "status", default)]
    pub status: String,
    /// Anchore policy bundle the check ran against.
    #[serde(rename = "PolicyId", alias = "policyId", default)]
    pub policy_id: String,
    /// Time of the evaluation.
    #[serde(rename = "LastEvaluation", alias = "last_evaluation", default)]
    pub last_evaluation: String,
    /// Gate results, passed on to policies untouched.
    #[serde(rename = "Detail", alias = "detail", default)]
    pub detail: Value,
}

impl PolicyCheck {
    pub(crate) fn passed(&self) -> bool {
        self.status.eq_ignore_ascii_case("pass")
    }
}

/// `GET /images/<digest>/check` response: digest → tag → evaluations.
pub(crate) type CheckResponse = Vec<HashMap<String, HashMap<String, Vec<PolicyCheck>>>>;
