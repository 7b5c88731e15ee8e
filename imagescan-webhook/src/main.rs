//! Image scan admission webhook binary
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use imagescan_runtime::AdmissionEvaluator;
use imagescan_webhook::{
    anchore::AnchoreClient, opa::OpaCli, server, source::FilePolicySource, AppState, Cli, Config,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("a rustls crypto provider is already installed"))?;

    let config = Config::load(&cli)?;
    let token = config
        .scanner
        .token
        .as_ref()
        .context("no scanner token configured, set scanner.token or ANCHORE_TOKEN")?;

    let scanner = AnchoreClient::https(config.scanner.endpoint.clone(), token);
    let source = FilePolicySource::new(
        config.policy.rules.clone(),
        config.policy.data.clone(),
        config.policy.pre_scan_rules.clone(),
    );
    let evaluator = AdmissionEvaluator::new(
        Arc::new(scanner),
        Arc::new(OpaCli::new(config.opa.binary.clone())),
        Arc::new(source),
    )
    .retry(config.retry.clone())
    .concurrency(config.scanner.concurrency);

    let app = server::router(AppState::new(Arc::new(evaluator), config.server.request_timeout()));
    let tls = config.server.cert.clone().zip(config.server.key.clone());
    server::run(app, config.server.port, tls).await?;
    Ok(())
}
