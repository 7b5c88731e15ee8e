use async_trait::async_trait;
use bytes::Bytes;
use http::{header::CONTENT_TYPE, Request, Response, StatusCode};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Full};
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use imagescan_core::{ScanReport, ScanStatus};
use imagescan_runtime::{ScanError, Scanner};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tower::{util::BoxCloneSyncService, BoxError, Service, ServiceBuilder, ServiceExt};
use tower_http::auth::AddAuthorizationLayer;

use super::types::{AddImage, CheckResponse, ImageInfo, PolicyCheck};

/// Response body of the Anchore service stack.
pub type AnchoreBody = UnsyncBoxBody<Bytes, BoxError>;

/// Failure talking to Anchore.
#[derive(Debug, Error)]
pub enum AnchoreError {
    /// The request could not be built.
    #[error("failed to build request to Anchore: {0}")]
    BuildRequest(#[source] http::Error),

    /// The request body could not be encoded.
    #[error("failed to encode request to Anchore: {0}")]
    Encode(#[source] serde_json::Error),

    /// The request did not complete.
    #[error("failed to complete request to Anchore: {0}")]
    Send(#[source] BoxError),

    /// The response body could not be read.
    #[error("failed to read response from Anchore: {0}")]
    ReadBody(#[source] BoxError),

    /// Anchore answered with a status other than 200.
    #[error("response from Anchore: {0}")]
    Status(u16),

    /// The response body is not what the endpoint documents.
    #[error("failed to decode response from Anchore: {0}")]
    Decode(#[source] serde_json::Error),

    /// `/images` did not return the image record yet.
    #[error("expected 1 image in /images response")]
    NoDigest,

    /// The check response is for another digest.
    #[error("Digest in the scan report does not match")]
    DigestMismatch,

    /// The check response has no evaluation for the image.
    #[error("no policy evaluation in the scan report of {0}")]
    NoEvaluation(String),
}

impl AnchoreError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Send(_) => true,
            Self::Status(code) => *code >= 500 || *code == StatusCode::TOO_MANY_REQUESTS.as_u16(),
            _ => false,
        }
    }
}

impl From<AnchoreError> for ScanError {
    fn from(err: AnchoreError) -> Self {
        if err.is_transient() {
            ScanError::transient(err)
        } else {
            ScanError::backend(err)
        }
    }
}

/// Client for the Anchore Engine API, usable as a [`Scanner`].
///
/// Requests authenticate with HTTP basic auth, the API token as user name and
/// an empty password.
#[derive(Clone)]
pub struct AnchoreClient {
    inner: BoxCloneSyncService<Request<Full<Bytes>>, Response<AnchoreBody>, BoxError>,
    base_url: String,
}

impl AnchoreClient {
    /// Create a client over a custom service stack.
    ///
    /// `base_url` is the API root, e.g. `https://anchore.example.com/v1`.
    pub fn new<S, B>(service: S, base_url: impl Into<String>, token: &SecretString) -> Self
    where
        S: Service<Request<Full<Bytes>>, Response = Response<B>> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
        S::Error: Into<BoxError>,
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let service = ServiceBuilder::new()
            .map_err(|err: S::Error| -> BoxError { err.into() })
            .map_response(|res: Response<B>| {
                res.map(|body| body.map_err(|err: B::Error| -> BoxError { err.into() }).boxed_unsync())
            })
            .layer(AddAuthorizationLayer::basic(token.expose_secret(), "").as_sensitive(true))
            .service(service);
        Self {
            inner: BoxCloneSyncService::new(service),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Create a client talking HTTP/1 over rustls with the webpki roots.
    pub fn https(base_url: impl Into<String>, token: &SecretString) -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);
        Self::new(client, base_url, token)
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Bytes, AnchoreError> {
        tracing::debug!(method = %request.method(), uri = %request.uri(), "sending request to Anchore");
        let res = self.inner.clone().oneshot(request).await.map_err(AnchoreError::Send)?;
        let status = res.status();
        let body = res
            .into_body()
            .collect()
            .await
            .map_err(AnchoreError::ReadBody)?
            .to_bytes();
        if status != StatusCode::OK {
            return Err(AnchoreError::Status(status.as_u16()));
        }
        Ok(body)
    }

    /// Register `image` for analysis and return its digest.
    pub async fn add_image(&self, image: &str) -> Result<String, AnchoreError> {
        let body = serde_json::to_vec(&AddImage { tag: image }).map_err(AnchoreError::Encode)?;
        let request = Request::post(format!("{}/images", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(AnchoreError::BuildRequest)?;
        let res = self.send(request).await?;
        let images: Vec<ImageInfo> = serde_json::from_slice(&res).map_err(AnchoreError::Decode)?;
        match images.as_slice() {
            [image] if !image.image_digest.is_empty() => Ok(image.image_digest.clone()),
            _ => Err(AnchoreError::NoDigest),
        }
    }

    /// Fetch the policy evaluation of `tag` at `digest`.
    pub async fn check(
        &self,
        digest: &str,
        tag: &str,
        policy_id: Option<&str>,
    ) -> Result<PolicyCheck, AnchoreError> {
        let target = format!("{}/images/{digest}/check?", self.base_url);
        let uri = {
            let mut qp = form_urlencoded::Serializer::new(target);
            qp.append_pair("tag", tag);
            qp.append_pair("history", "false");
            qp.append_pair("detail", "true");
            if let Some(policy_id) = policy_id {
                qp.append_pair("policyId", policy_id);
            }
            qp.finish()
        };
        let request = Request::get(uri)
            .body(Full::default())
            .map_err(AnchoreError::BuildRequest)?;
        let res = self.send(request).await?;
        let reports: CheckResponse = serde_json::from_slice(&res).map_err(AnchoreError::Decode)?;

        let by_tag = reports
            .into_iter()
            .next()
            .ok_or_else(|| AnchoreError::NoEvaluation(tag.to_owned()))?
            .remove(digest)
            .ok_or(AnchoreError::DigestMismatch)?;
        let checks = match by_tag.get(tag) {
            Some(checks) => checks,
            None => by_tag
                .values()
                .next()
                .ok_or_else(|| AnchoreError::NoEvaluation(tag.to_owned()))?,
        };
        checks
            .first()
            .cloned()
            .ok_or_else(|| AnchoreError::NoEvaluation(tag.to_owned()))
    }
}

#[async_trait]
impl Scanner for AnchoreClient {
    async fn start_scan(&self, image: &str) -> Result<String, ScanError> {
        match self.add_image(image).await {
            Ok(digest) => {
                tracing::info!(image, %digest, "image added to Anchore");
                Ok(digest)
            }
            Err(AnchoreError::NoDigest) => Err(ScanError::DigestPending(image.to_owned())),
            Err(err) => Err(err.into()),
        }
    }

    async fn get_report(
        &self,
        image: &str,
        digest: &str,
        policy_id: Option<&str>,
    ) -> Result<ScanReport, ScanError> {
        let check = self.check(digest, image, policy_id).await?;
        let status = if check.passed() {
            ScanStatus::Accepted
        } else {
            ScanStatus::Rejected
        };
        let detail = serde_json::to_value(&check).map_err(ScanError::backend)?;
        let mut report = ScanReport::new(image, status).with_detail(detail);
        if !check.policy_id.is_empty() {
            report = report.with_policy_id(check.policy_id);
        }
        Ok(report)
    }
}
