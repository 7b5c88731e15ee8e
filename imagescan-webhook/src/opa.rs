//! Policy evaluation through the `opa` command line tool
use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use imagescan_runtime::{Expression, PolicyError, PolicyEvaluator, ResultSet};
use serde::Deserialize;
use serde_json::Value;
use tokio::{io::AsyncWriteExt, process::Command};

#[derive(Deserialize)]
struct EvalOutput {
    #[serde(default)]
    result: Vec<EvalResult>,
}

#[derive(Deserialize)]
struct EvalResult {
    #[serde(default)]
    expressions: Vec<Expression>,
}

/// Decode the JSON printed by `opa eval --format json`.
///
/// An undefined query prints `{}`, which decodes to no results.
fn parse_output(stdout: &[u8]) -> Result<Vec<ResultSet>, PolicyError> {
    let output: EvalOutput = serde_json::from_slice(stdout).map_err(PolicyError::DecodeOutput)?;
    Ok(output.result.into_iter().map(|r| r.expressions).collect())
}

/// Runs `opa eval` once per query.
///
/// Rules and data are written to a fresh temporary directory for every call
/// and the input is fed through stdin. The child is killed if the evaluation
/// is dropped before it finishes.
#[derive(Clone, Debug)]
pub struct OpaCli {
    binary: PathBuf,
}

impl Default for OpaCli {
    fn default() -> Self {
        Self::new("opa")
    }
}

impl OpaCli {
    /// Use the `opa` executable at `binary`, looked up in `PATH` if relative.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }
}

#[async_trait]
impl PolicyEvaluator for OpaCli {
    async fn evaluate(
        &self,
        query: &str,
        rules: &str,
        data: &str,
        input: &Value,
    ) -> Result<Vec<ResultSet>, PolicyError> {
        let input = serde_json::to_vec(input).map_err(PolicyError::EncodeInput)?;
        let dir = tempfile::tempdir().map_err(PolicyError::Io)?;
        let rules_path = dir.path().join("rules.rego");
        let data_path = dir.path().join("data.json");
        tokio::fs::write(&rules_path, rules).await.map_err(PolicyError::Io)?;
        tokio::fs::write(&data_path, data).await.map_err(PolicyError::Io)?;

        let mut child = Command::new(&self.binary)
            .args(["eval", "--format", "json", "--stdin-input", "-d"])
            .arg(&rules_path)
            .arg("-d")
            .arg(&data_path)
            .arg(query)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(PolicyError::Io)?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await.map_err(PolicyError::Io)?;
        }
        let output = child.wait_with_output().await.map_err(PolicyError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = if stderr.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout).trim().to_owned()
            } else {
                stderr.trim().to_owned()
            };
            tracing::debug!(query, status = %output.status, "opa eval failed");
            return Err(PolicyError::Engine(msg));
        }
        parse_output(&output.stdout)
    }
}
