//! HTTP endpoints of the webhook
//!
//! | route             | purpose                                    |
//! |-------------------|--------------------------------------------|
//! | `POST /mutate`    | admit or reject, pinning images on admit   |
//! | `POST /validate`  | admit or reject only                       |
//! | `GET /healthz`    | liveness                                   |
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use imagescan_runtime::AdmissionEvaluator;
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    DynamicObject,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::review::{review, ReviewMode};

/// Failure to serve.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The certificate or key could not be loaded.
    #[error("failed to load TLS certificate {} and key {}: {source}", .cert.display(), .key.display())]
    Tls {
        /// Certificate path.
        cert: PathBuf,
        /// Key path.
        key: PathBuf,
        /// Load failure.
        #[source]
        source: std::io::Error,
    },

    /// The listener failed.
    #[error("webhook server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Shared state of the handlers.
#[derive(Clone)]
pub struct AppState {
    evaluator: Arc<AdmissionEvaluator>,
    request_timeout: Duration,
}

impl AppState {
    /// Handlers evaluating with `evaluator`, each request cancelled after
    /// `request_timeout`.
    pub fn new(evaluator: Arc<AdmissionEvaluator>, request_timeout: Duration) -> Self {
        Self {
            evaluator,
            request_timeout,
        }
    }
}

/// Build the webhook router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mutate", post(mutate))
        .route("/validate", post(validate))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn mutate(
    State(state): State<AppState>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    handle(state, body, ReviewMode::Mutate).await
}

async fn validate(
    State(state): State<AppState>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    handle(state, body, ReviewMode::Validate).await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn handle(
    state: AppState,
    body: AdmissionReview<DynamicObject>,
    mode: ReviewMode,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(err) => {
            error!(error = %err, "invalid admission review");
            return (
                StatusCode::BAD_REQUEST,
                Json(AdmissionResponse::invalid(err.to_string()).into_review()),
            );
        }
    };

    // Cancelled on timeout, and when the caller goes away and this future is dropped.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let timer = tokio::spawn({
        let cancel = cancel.clone();
        let budget = state.request_timeout;
        async move {
            tokio::time::sleep(budget).await;
            cancel.cancel();
        }
    });
    let res = review(&state.evaluator, &req, mode, &cancel).await;
    timer.abort();

    (StatusCode::OK, Json(res.into_review()))
}

/// Serve `app` on all interfaces at `port` until ctrl-c.
///
/// TLS is used when both `cert` and `key` are given, plain HTTP otherwise.
pub async fn run(
    app: Router,
    port: u16,
    tls: Option<(PathBuf, PathBuf)>,
) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "cannot listen for shutdown signal");
            return;
        }
        info!("shutting down");
        shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    match tls {
        Some((cert, key)) => {
            let config = RustlsConfig::from_pem_file(&cert, &key)
                .await
                .map_err(|source| ServerError::Tls { cert, key, source })?;
            info!(port, "webhook listening with TLS");
            axum_server::bind_rustls(addr, config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(ServerError::Serve)
        }
        None => {
            info!(port, "webhook listening without TLS");
            axum_server::bind(addr)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(ServerError::Serve)
        }
    }
}
