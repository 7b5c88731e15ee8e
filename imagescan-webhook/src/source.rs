//! Policy documents read from disk
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use imagescan_runtime::{PolicySource, SourceError};

/// Reads rules and data from files on every call.
///
/// Typically the files are a mounted ConfigMap, so edits are picked up by the
/// next admission request.
#[derive(Clone, Debug)]
pub struct FilePolicySource {
    rules: Option<PathBuf>,
    data: Option<PathBuf>,
    pre_scan_rules: Option<PathBuf>,
}

impl FilePolicySource {
    /// A source reading the given files; `None` means not configured.
    pub fn new(rules: Option<PathBuf>, data: Option<PathBuf>, pre_scan_rules: Option<PathBuf>) -> Self {
        Self {
            rules,
            data,
            pre_scan_rules,
        }
    }
}

async fn read(what: &'static str, path: Option<&Path>) -> Result<String, SourceError> {
    let path = path.ok_or(SourceError::Missing(what))?;
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::Read {
            what,
            path: path.to_owned(),
            source,
        })
}

#[async_trait]
impl PolicySource for FilePolicySource {
    async fn rules(&self) -> Result<String, SourceError> {
        read("rules", self.rules.as_deref()).await
    }

    async fn data(&self) -> Result<String, SourceError> {
        read("policy data", self.data.as_deref()).await
    }

    async fn pre_scan_rules(&self) -> Result<String, SourceError> {
        read("pre-scan rules", self.pre_scan_rules.as_deref()).await
    }
}
