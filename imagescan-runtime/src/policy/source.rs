use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Pre-scan query whose messages admit the pod without scanning.
pub const ALLOW_POD_QUERY: &str = "data.imageadmission.allow_pod";
/// Pre-scan query whose messages reject the pod without scanning.
pub const DENY_POD_QUERY: &str = "data.imageadmission.deny_pod";
/// Per-container query whose messages reject the pod.
pub const DENY_IMAGE_QUERY: &str = "data.imageadmission.deny_image";

/// Rules used when no container rules can be loaded: every image is denied.
pub const DEFAULT_RULES: &str = r#"package imageadmission

deny_image[msg] {
	msg := "No rules defined. Please define 'imageadmission' package with deny_image[msg] rules"
}
"#;

/// Rules used when no pre-scan rules can be loaded: nothing is allowed or
/// denied up front, so every pod goes on to scanning.
pub const DEFAULT_PRE_SCAN_RULES: &str = r#"package imageadmission

allow_pod[msg] {
	false
	msg := ""
}

deny_pod[msg] {
	false
	msg := ""
}
"#;

/// Failure to load a rule or data document.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The document could not be read.
    #[error("failed to load {what} from {}: {source}", .path.display())]
    Read {
        /// Which document.
        what: &'static str,
        /// Where it was looked for.
        path: PathBuf,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// No location is configured for the document.
    #[error("no {0} configured")]
    Missing(&'static str),
}

/// Accessors for the documents policies are evaluated with.
///
/// Each accessor is called once per admission evaluation, so implementations
/// may reload on every call. The accessors fail independently: missing rules
/// fall back to [`DEFAULT_RULES`], missing pre-scan rules to
/// [`DEFAULT_PRE_SCAN_RULES`], missing data rejects the request.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Per-container rule module.
    async fn rules(&self) -> Result<String, SourceError>;
    /// JSON data document shared by all queries.
    async fn data(&self) -> Result<String, SourceError>;
    /// Pre-scan rule module.
    async fn pre_scan_rules(&self) -> Result<String, SourceError>;
}

/// A [`PolicySource`] over fixed documents.
#[derive(Clone, Debug, Default)]
pub struct StaticPolicySource {
    /// Per-container rules.
    pub rules: Option<String>,
    /// Data document.
    pub data: Option<String>,
    /// Pre-scan rules.
    pub pre_scan_rules: Option<String>,
}

impl StaticPolicySource {
    /// A source with the given rules and data and no pre-scan rules.
    pub fn new(rules: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            rules: Some(rules.into()),
            data: Some(data.into()),
            pre_scan_rules: None,
        }
    }

    /// Set the pre-scan rules.
    #[must_use]
    pub fn with_pre_scan_rules(mut self, rules: impl Into<String>) -> Self {
        self.pre_scan_rules = Some(rules.into());
        self
    }
}

#[async_trait]
impl PolicySource for StaticPolicySource {
    async fn rules(&self) -> Result<String, SourceError> {
        self.rules.clone().ok_or(SourceError::Missing("rules"))
    }

    async fn data(&self) -> Result<String, SourceError> {
        self.data.clone().ok_or(SourceError::Missing("policy data"))
    }

    async fn pre_scan_rules(&self) -> Result<String, SourceError> {
        self.pre_scan_rules.clone().ok_or(SourceError::Missing("pre-scan rules"))
    }
}
