//! The admission request as the pipeline sees it
use serde_json::Value;

/// Identifying data of one admission request plus its raw JSON.
///
/// Built once by the transport and immutable for the whole evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdmissionContext {
    /// Request UID, used to correlate log lines with the API server.
    pub uid: String,
    /// Namespace of the object, if any. Opaque to the pipeline.
    pub namespace: Option<String>,
    /// The request as JSON, handed to policies.
    pub raw: Value,
}

impl AdmissionContext {
    /// A context with the given UID and no raw payload.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            namespace: None,
            raw: Value::Null,
        }
    }

    /// Set the namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the raw request JSON.
    #[must_use]
    pub fn raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }
}
