//! The admission evaluation pipeline
use std::sync::Arc;

use imagescan_core::{AdmissionContext, AdmissionDecision, PodObject};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    aggregator::DEFAULT_CONCURRENCY,
    policy::{DEFAULT_PRE_SCAN_RULES, DEFAULT_RULES},
    EvaluationAggregator, PolicyEvaluator, PolicyGateway, PolicySource, PreScanGate, PreScanOutcome,
    RetryPolicy, ScanCoordinator, Scanner,
};

/// Evaluates admission requests for pods.
///
/// Rules and data are fetched from the [`PolicySource`] at the start of every
/// evaluation. The pre-scan gate runs first and may settle the request on its
/// own; otherwise every container is scanned and checked against the
/// container rules.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use imagescan_core::{AdmissionContext, PodObject};
/// # use imagescan_runtime::{AdmissionEvaluator, PolicyEvaluator, Scanner, StaticPolicySource};
/// # use tokio_util::sync::CancellationToken;
/// # async fn wrapper(scanner: Arc<dyn Scanner>, engine: Arc<dyn PolicyEvaluator>, pod: PodObject) {
/// let source = StaticPolicySource::new("package imageadmission", "{}");
/// let evaluator = AdmissionEvaluator::new(scanner, engine, Arc::new(source)).concurrency(2);
/// let decision = evaluator
///     .evaluate(&AdmissionContext::new("uid"), &pod, &CancellationToken::new())
///     .await;
/// if !decision.accepted {
///     println!("{}", decision.message());
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct AdmissionEvaluator {
    scanner: Arc<dyn Scanner>,
    gateway: PolicyGateway,
    source: Arc<dyn PolicySource>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl AdmissionEvaluator {
    /// A pipeline with the default retry policy and concurrency.
    pub fn new(
        scanner: Arc<dyn Scanner>,
        evaluator: Arc<dyn PolicyEvaluator>,
        source: Arc<dyn PolicySource>,
    ) -> Self {
        Self {
            scanner,
            gateway: PolicyGateway::new(evaluator),
            source,
            retry: RetryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Set the retry policy of digest resolution.
    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set how many containers of one pod are evaluated at once.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Evaluate one admission request.
    ///
    /// `cancel` aborts outstanding scanner calls; containers whose scan is
    /// abandoned are evaluated with a sentinel report.
    #[tracing::instrument(skip_all, fields(
        uid = %request.uid,
        namespace = request.namespace.as_deref().unwrap_or_default(),
        pod = %pod.display_name(),
    ))]
    pub async fn evaluate(
        &self,
        request: &AdmissionContext,
        pod: &PodObject,
        cancel: &CancellationToken,
    ) -> AdmissionDecision {
        let rules = self.source.rules().await.unwrap_or_else(|err| {
            warn!(error = %err, "using default rules");
            DEFAULT_RULES.to_owned()
        });
        let pre_scan_rules = self.source.pre_scan_rules().await.unwrap_or_else(|err| {
            warn!(error = %err, "using default pre-scan rules");
            DEFAULT_PRE_SCAN_RULES.to_owned()
        });
        let data = match self.source.data().await {
            Ok(data) => data,
            Err(err) => {
                error!(error = %err, "cannot load policy data");
                return AdmissionDecision::deny(err.to_string());
            }
        };

        info!("pre-scan check");
        let gate = PreScanGate::new(self.gateway.clone());
        match gate.evaluate(request, pod, &pre_scan_rules, &data).await {
            PreScanOutcome::Allowed => {
                info!("pre-scan check allowed pod");
                return AdmissionDecision::allow();
            }
            PreScanOutcome::Rejected(reasons) => {
                info!(%reasons, "pre-scan check rejected pod");
                return AdmissionDecision::deny(format!("Pre-scan rejected. Reasons: {reasons}"));
            }
            PreScanOutcome::Indecisive => info!("pre-scan check not conclusive, proceeding to scan"),
        }

        let coordinator = ScanCoordinator::new(self.scanner.clone(), self.retry.clone());
        EvaluationAggregator::new(coordinator, self.gateway.clone())
            .concurrency(self.concurrency)
            .evaluate(request, pod, &rules, &data, cancel)
            .await
    }
}
