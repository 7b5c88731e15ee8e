//! Policy evaluation capability and result interpretation
//!
//! A [`PolicyEvaluator`] runs one query of a rule module against a data
//! document and an input, and returns the engine's raw result sets. The
//! [`PolicyGateway`] turns those into a [`PolicyOutcome`]: the rules are
//! expected to define a set of violation messages, so a well-formed answer is
//! exactly one result with exactly one expression whose value is a list of
//! strings. Anything else becomes an evaluation error message that policy
//! authors see in the rejection.
use std::sync::Arc;

use async_trait::async_trait;
use imagescan_core::EvaluationInput;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

mod source;
pub use source::{
    PolicySource, SourceError, StaticPolicySource, ALLOW_POD_QUERY, DEFAULT_PRE_SCAN_RULES, DEFAULT_RULES,
    DENY_IMAGE_QUERY, DENY_POD_QUERY,
};

/// One evaluated expression of a query.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Expression {
    /// Value the expression evaluated to.
    pub value: Value,
    /// Source text of the expression.
    #[serde(default)]
    pub text: String,
}

/// The expressions of one result of a query.
pub type ResultSet = Vec<Expression>;

/// Failure to run the policy engine.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The input could not be serialized.
    #[error("failed to encode policy input: {0}")]
    EncodeInput(#[source] serde_json::Error),

    /// The engine could not be started or fed.
    #[error("failed to run policy engine: {0}")]
    Io(#[source] std::io::Error),

    /// The engine rejected the rules, data or query.
    #[error("{0}")]
    Engine(String),

    /// The engine answered with something that is not a result document.
    #[error("failed to decode policy engine output: {0}")]
    DecodeOutput(#[source] serde_json::Error),
}

/// A policy engine.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Evaluate `query` against the `rules` module and the JSON `data` document.
    async fn evaluate(
        &self,
        query: &str,
        rules: &str,
        data: &str,
        input: &Value,
    ) -> Result<Vec<ResultSet>, PolicyError>;
}

/// Interpreted answer of one policy query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// The query produced no messages.
    Clean,
    /// The messages the query produced, in engine order.
    Violations(Vec<String>),
    /// The engine could not evaluate the query.
    Engine(String),
    /// The engine answered, but not with exactly one list of strings.
    ///
    /// An undefined rule lands here: the engine answers with no result at all.
    Malformed(String),
}

impl PolicyOutcome {
    /// Messages of the outcome; a failure counts as a single message.
    pub fn into_violations(self) -> Vec<String> {
        match self {
            Self::Clean => Vec::new(),
            Self::Violations(msgs) => msgs,
            Self::Engine(msg) | Self::Malformed(msg) => vec![msg],
        }
    }

    fn from_results(results: &[ResultSet]) -> Self {
        let expressions = match results {
            [only] => only,
            _ => {
                return Self::Malformed(format!(
                    "Evaluation error - unexpected result length: {}",
                    describe_lengths(results)
                ))
            }
        };
        let value = match expressions.as_slice() {
            [only] => &only.value,
            _ => {
                return Self::Malformed(format!(
                    "Evaluation error - unexpected result length: {}",
                    describe_lengths(results)
                ))
            }
        };
        let Value::Array(items) = value else {
            return Self::Malformed(format!(
                "Evaluation error - unexpected expression type: {} - value: {value}",
                type_name(value)
            ));
        };
        let mut msgs = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(msg) => msgs.push(msg.clone()),
                other => {
                    return Self::Malformed(format!(
                        "Evaluation error - unexpected value type: {} - value: {other}",
                        type_name(other)
                    ))
                }
            }
        }
        if msgs.is_empty() {
            Self::Clean
        } else {
            Self::Violations(msgs)
        }
    }
}

/// `<results>/<expressions of the first result>`
fn describe_lengths(results: &[ResultSet]) -> String {
    format!("{}/{}", results.len(), results.first().map_or(0, Vec::len))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Runs queries through a [`PolicyEvaluator`] and interprets the answers.
#[derive(Clone)]
pub struct PolicyGateway {
    evaluator: Arc<dyn PolicyEvaluator>,
}

impl PolicyGateway {
    /// Wrap an evaluator.
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>) -> Self {
        Self { evaluator }
    }

    /// Evaluate `query` and interpret the result. Never fails: engine
    /// problems come back as [`PolicyOutcome::Engine`].
    pub async fn evaluate(
        &self,
        query: &str,
        rules: &str,
        data: &str,
        input: &EvaluationInput<'_>,
    ) -> PolicyOutcome {
        let input = match serde_json::to_value(input) {
            Ok(input) => input,
            Err(err) => {
                let err = PolicyError::EncodeInput(err);
                return PolicyOutcome::Engine(format!("Evaluation error: {err}"));
            }
        };
        let outcome = match self.evaluator.evaluate(query, rules, data, &input).await {
            Ok(results) => PolicyOutcome::from_results(&results),
            Err(err) => PolicyOutcome::Engine(format!("Evaluation error: {err}")),
        };
        match &outcome {
            PolicyOutcome::Engine(msg) => tracing::warn!(query, error = %msg, "policy evaluation failed"),
            PolicyOutcome::Malformed(msg) => tracing::warn!(query, error = %msg, "unexpected policy result"),
            _ => tracing::debug!(query, ?outcome, "policy evaluated"),
        }
        outcome
    }
}
