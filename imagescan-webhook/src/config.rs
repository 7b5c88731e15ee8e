//! Command line and configuration file
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use imagescan_runtime::RetryPolicy;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Failure to load the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for [`Config`].
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parse failure.
        #[source]
        source: serde_yaml::Error,
    },

    /// Only one of the TLS certificate and key is configured.
    #[error("TLS needs both a certificate and a key")]
    IncompleteTls,
}

/// Kubernetes admission webhook gating pods on image scan results
#[derive(Parser, Debug, Default)]
#[command(name = "image-scan-webhook", version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "IMAGE_SCAN_WEBHOOK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Port to listen on, overriding the configuration file
    #[arg(long)]
    pub port: Option<u16>,

    /// PEM certificate for TLS, overriding the configuration file
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// PEM private key for TLS, overriding the configuration file
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Anchore API token, overriding the configuration file
    #[arg(long, env = "ANCHORE_TOKEN", hide_env_values = true)]
    pub scanner_token: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

/// Whole webhook configuration.
#[derive(Deserialize, Debug, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Listener settings.
    pub server: ServerConfig,
    /// Scanner backend settings.
    pub scanner: ScannerConfig,
    /// Digest resolution retries.
    pub retry: RetryPolicy,
    /// Policy document locations.
    pub policy: PolicyConfig,
    /// Policy engine settings.
    pub opa: OpaConfig,
}

/// Default [`ServerConfig::request_timeout_secs`], leaving room for policy
/// evaluation under the default webhook timeout of 10 seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 8;

/// Listener settings.
#[derive(Deserialize, Debug)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Listen port.
    pub port: u16,
    /// PEM certificate; TLS is enabled when set together with `key`.
    pub cert: Option<PathBuf>,
    /// PEM private key.
    pub key: Option<PathBuf>,
    /// Budget of one admission evaluation, in seconds.
    ///
    /// Scans are abandoned when it runs out and the policies are still
    /// evaluated afterwards, so it must stay strictly below the
    /// `timeoutSeconds` of the webhook configuration (10 by default).
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            cert: None,
            key: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl ServerConfig {
    /// [`Self::request_timeout_secs`] as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Scanner backend settings.
#[derive(Deserialize, Debug)]
#[serde(default, rename_all = "camelCase")]
pub struct ScannerConfig {
    /// Anchore API root.
    pub endpoint: String,
    /// Anchore API token.
    #[serde(deserialize_with = "deserialize_secretstring")]
    pub token: Option<SecretString>,
    /// Containers of one pod evaluated at once.
    pub concurrency: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://secure.sysdig.com/api/scanning/v1/anchore".into(),
            token: None,
            concurrency: 4,
        }
    }
}

fn deserialize_secretstring<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Policy document locations.
#[derive(Deserialize, Debug)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyConfig {
    /// Per-container rules.
    pub rules: Option<PathBuf>,
    /// JSON data document.
    pub data: Option<PathBuf>,
    /// Pre-scan rules.
    pub pre_scan_rules: Option<PathBuf>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let dir = Path::new("/etc/image-scan-webhook/policy");
        Self {
            rules: Some(dir.join("rules.rego")),
            data: Some(dir.join("data.json")),
            pre_scan_rules: Some(dir.join("prescan-rules.rego")),
        }
    }
}

/// Policy engine settings.
#[derive(Deserialize, Debug)]
#[serde(default, rename_all = "camelCase")]
pub struct OpaConfig {
    /// `opa` executable.
    pub binary: PathBuf,
}

impl Default for OpaConfig {
    fn default() -> Self {
        Self { binary: "opa".into() }
    }
}

impl Config {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    /// Load the file named on the command line, if any, and apply the
    /// command line overrides.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => {
                let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Self::from_yaml(&yaml, path)?
            }
            None => Self::default(),
        };
        config.apply(cli)?;
        Ok(config)
    }

    fn apply(&mut self, cli: &Cli) -> Result<(), ConfigError> {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(cert) = &cli.cert {
            self.server.cert = Some(cert.clone());
        }
        if let Some(key) = &cli.key {
            self.server.key = Some(key.clone());
        }
        if let Some(token) = &cli.scanner_token {
            self.scanner.token = Some(SecretString::from(token.clone()));
        }
        if self.server.cert.is_some() != self.server.key.is_some() {
            return Err(ConfigError::IncompleteTls);
        }
        Ok(())
    }
}
