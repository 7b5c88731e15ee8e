//! Per-container scan and policy evaluation, folded into one decision
use futures::{stream, StreamExt};
use imagescan_core::{
    AdmissionContext, AdmissionDecision, ContainerObject, EvaluationInput, PodObject, ScanReport,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{policy::DENY_IMAGE_QUERY, PolicyGateway, ScanCoordinator, ScanOutcome};

/// Default number of containers evaluated at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Scan policy to evaluate reports against, read from `policies.scanPolicyId`
/// of the data document.
pub fn scan_policy_id(data: &str) -> Result<Option<String>, serde_json::Error> {
    let data: Value = serde_json::from_str(data)?;
    Ok(data
        .pointer("/policies/scanPolicyId")
        .and_then(Value::as_str)
        .map(str::to_owned))
}

struct ContainerVerdict {
    digest: Option<String>,
    violations: Vec<String>,
}

/// Evaluates every container of a pod and aggregates the verdicts.
#[derive(Clone)]
pub struct EvaluationAggregator {
    coordinator: ScanCoordinator,
    gateway: PolicyGateway,
    concurrency: usize,
}

impl EvaluationAggregator {
    /// An aggregator evaluating [`DEFAULT_CONCURRENCY`] containers at once.
    pub fn new(coordinator: ScanCoordinator, gateway: PolicyGateway) -> Self {
        Self {
            coordinator,
            gateway,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Set how many containers are evaluated at once; `0` counts as `1`.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Scan and evaluate every container of `pod`.
    ///
    /// Containers may run concurrently, but results are folded in pod order:
    /// reasons follow the container order and a rejected container never
    /// prevents the next one from being evaluated. Every resolved digest is
    /// recorded, including those of rejected containers.
    pub async fn evaluate(
        &self,
        request: &AdmissionContext,
        pod: &PodObject,
        rules: &str,
        data: &str,
        cancel: &CancellationToken,
    ) -> AdmissionDecision {
        let policy_id = scan_policy_id(data).map_err(|err| err.to_string());

        // Collected before streaming: a borrowing closure inside the stream makes this
        // future `!Send`.
        let pending: Vec<_> = pod
            .containers
            .iter()
            .map(|container| {
                self.evaluate_container(request, pod, container, rules, data, &policy_id, cancel)
            })
            .collect();
        let verdicts: Vec<ContainerVerdict> = stream::iter(pending)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut decision = AdmissionDecision::allow();
        for (container, verdict) in pod.containers.iter().zip(verdicts) {
            if let Some(digest) = verdict.digest {
                decision.digests.insert(container.image.clone(), digest);
            }
            if verdict.violations.is_empty() {
                info!(
                    uid = %request.uid,
                    container = %container.name,
                    image = %container.image,
                    "container allowed"
                );
                continue;
            }
            let reasons = verdict.violations.join(", ");
            info!(
                uid = %request.uid,
                container = %container.name,
                image = %container.image,
                %reasons,
                "container rejected"
            );
            decision.accepted = false;
            decision.deny_reasons.push(format!(
                "Image '{}' for container '{}' failed scan policy check: {reasons}",
                container.image, container.name
            ));
        }
        decision
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_container(
        &self,
        request: &AdmissionContext,
        pod: &PodObject,
        container: &ContainerObject,
        rules: &str,
        data: &str,
        policy_id: &Result<Option<String>, String>,
        cancel: &CancellationToken,
    ) -> ContainerVerdict {
        info!(uid = %request.uid, container = %container.name, image = %container.image, "scan check");
        let outcome = match policy_id {
            Ok(policy_id) => {
                self.coordinator
                    .scan(&container.image, policy_id.as_deref(), cancel)
                    .await
            }
            Err(err) => {
                let digest = self.coordinator.resolve(&container.image, cancel).await;
                warn!(image = %container.image, error = %err, "cannot read scan policy id from policy data");
                ScanOutcome {
                    report: ScanReport::scan_failed(&container.image),
                    digest,
                }
            }
        };

        let input = EvaluationInput::container(request, pod, container, &outcome.report);
        let violations = self
            .gateway
            .evaluate(DENY_IMAGE_QUERY, rules, data, &input)
            .await
            .into_violations();
        ContainerVerdict {
            digest: outcome.digest,
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use imagescan_core::{build_patch, ScanStatus};

    use super::*;
    use crate::{
        test_utils::{MockEvaluator, MockScanner},
        RetryPolicy,
    };

    fn pod(images: &[(&str, &str)]) -> PodObject {
        PodObject {
            name: Some("web".into()),
            containers: images
                .iter()
                .map(|(name, image)| ContainerObject::new(*name, *image))
                .collect(),
            ..Default::default()
        }
    }

    fn aggregator(scanner: Arc<MockScanner>, evaluator: Arc<MockEvaluator>) -> EvaluationAggregator {
        EvaluationAggregator::new(
            ScanCoordinator::new(scanner, RetryPolicy::default()),
            PolicyGateway::new(evaluator),
        )
    }

    async fn run(
        scanner: &Arc<MockScanner>,
        evaluator: &Arc<MockEvaluator>,
        pod: &PodObject,
        data: &str,
    ) -> AdmissionDecision {
        aggregator(scanner.clone(), evaluator.clone())
            .evaluate(&AdmissionContext::new("uid"), pod, "rules", data, &CancellationToken::new())
            .await
    }

    #[test]
    fn reads_scan_policy_id() {
        assert_eq!(
            scan_policy_id(r#"{"policies": {"scanPolicyId": "strict"}}"#).unwrap(),
            Some("strict".to_owned())
        );
        assert_eq!(scan_policy_id(r#"{"policies": {}}"#).unwrap(), None);
        assert_eq!(scan_policy_id(r#"{"policies": {"scanPolicyId": 7}}"#).unwrap(), None);
        assert!(scan_policy_id("not json").is_err());
    }

    #[tokio::test]
    async fn every_container_is_scanned_once_and_evaluated_once() {
        let scanner = Arc::new(MockScanner::new().digest("a:1", "sha256:a").digest("b:2", "sha256:b"));
        let evaluator = Arc::new(MockEvaluator::new());
        let decision = run(&scanner, &evaluator, &pod(&[("a", "a:1"), ("b", "b:2")]), "{}").await;

        assert!(decision.accepted);
        assert!(decision.deny_reasons.is_empty());
        assert_eq!(decision.digests.get("a:1"), Some("sha256:a"));
        assert_eq!(decision.digests.get("b:2"), Some("sha256:b"));
        assert_eq!(scanner.start_calls(), vec!["a:1", "b:2"]);
        assert_eq!(scanner.report_calls().len(), 2);
        assert_eq!(evaluator.count(DENY_IMAGE_QUERY), 2);
    }

    #[tokio::test]
    async fn scan_failure_is_handed_to_policy() {
        let scanner = Arc::new(MockScanner::new().digest("b:2", "sha256:b"));
        let evaluator = Arc::new(MockEvaluator::new());
        let decision = run(&scanner, &evaluator, &pod(&[("a", "a:1"), ("b", "b:2")]), "{}").await;

        assert!(decision.accepted);
        assert_eq!(decision.digests.len(), 1);
        assert_eq!(decision.digests.get("a:1"), None);
        let first = &evaluator.calls()[0];
        assert_eq!(first.input["ScanReport"]["Status"], "scan_failed");
        assert_eq!(first.input["ContainerObject"]["name"], "a");
        assert_eq!(scanner.report_calls().len(), 1);
    }

    #[tokio::test]
    async fn rejected_container_keeps_digest() {
        let scanner = Arc::new(
            MockScanner::new()
                .digest("a:1", "sha256:a")
                .digest("b:2", "sha256:b")
                .status("b:2", ScanStatus::Rejected),
        );
        let evaluator = Arc::new(MockEvaluator::new().deny_image("b:2", &["critical CVE", "unsigned"]));
        let decision = run(&scanner, &evaluator, &pod(&[("a", "a:1"), ("b", "b:2")]), "{}").await;

        assert!(!decision.accepted);
        assert_eq!(decision.deny_reasons, vec![
            "Image 'b:2' for container 'b' failed scan policy check: critical CVE, unsigned".to_owned()
        ]);
        assert_eq!(decision.digests.get("a:1"), Some("sha256:a"));
        assert_eq!(decision.digests.get("b:2"), Some("sha256:b"));
    }

    #[tokio::test]
    async fn reasons_follow_pod_order() {
        let scanner = Arc::new(MockScanner::new());
        let evaluator = Arc::new(
            MockEvaluator::new()
                .deny_image("a:1", &["first"])
                .deny_image("c:3", &["third"]),
        );
        let pod = pod(&[("a", "a:1"), ("b", "b:2"), ("c", "c:3")]);
        let decision = run(&scanner, &evaluator, &pod, "{}").await;
        assert_eq!(decision.deny_reasons, vec![
            "Image 'a:1' for container 'a' failed scan policy check: first".to_owned(),
            "Image 'c:3' for container 'c' failed scan policy check: third".to_owned(),
        ]);
        assert!(decision.digests.is_empty());
    }

    #[tokio::test]
    async fn policy_id_is_passed_to_the_scanner() {
        let scanner = Arc::new(MockScanner::new().digest("a:1", "sha256:a"));
        let evaluator = Arc::new(MockEvaluator::new());
        let data = r#"{"policies": {"scanPolicyId": "strict"}}"#;
        run(&scanner, &evaluator, &pod(&[("a", "a:1")]), data).await;
        assert_eq!(scanner.report_calls()[0].2.as_deref(), Some("strict"));
    }

    #[tokio::test]
    async fn unparsable_data_is_scan_failed_with_digest() {
        let scanner = Arc::new(MockScanner::new().digest("a:1", "sha256:a"));
        let evaluator = Arc::new(MockEvaluator::new());
        let decision = run(&scanner, &evaluator, &pod(&[("a", "a:1")]), "not json").await;

        assert_eq!(decision.digests.get("a:1"), Some("sha256:a"));
        assert!(scanner.report_calls().is_empty());
        assert_eq!(evaluator.calls()[0].input["ScanReport"]["Status"], "scan_failed");
    }

    #[tokio::test]
    async fn duplicate_images_are_looked_up_per_container() {
        let scanner = Arc::new(MockScanner::new().digest("a:1", "sha256:a"));
        let evaluator = Arc::new(MockEvaluator::new());
        let decision = run(&scanner, &evaluator, &pod(&[("a", "a:1"), ("sidecar", "a:1")]), "{}").await;
        assert_eq!(scanner.start_calls().len(), 2);
        assert_eq!(decision.digests.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_first_container_keeps_pod_order() {
        let scanner = Arc::new(
            MockScanner::new()
                .digest("a:1", "sha256:a")
                .digest("b:2", "sha256:b")
                .digest("c:3", "sha256:c")
                .delay("a:1", Duration::from_secs(3))
                .delay("b:2", Duration::from_secs(2))
                .delay("c:3", Duration::from_secs(1)),
        );
        let evaluator = Arc::new(
            MockEvaluator::new()
                .deny_image("a:1", &["first"])
                .deny_image("b:2", &["second"])
                .deny_image("c:3", &["third"]),
        );
        let pod = pod(&[("a", "a:1"), ("b", "b:2"), ("c", "c:3")]);
        let decision = run(&scanner, &evaluator, &pod, "{}").await;

        // completion order is the reverse of pod order
        assert_eq!(scanner.start_calls(), vec!["c:3", "b:2", "a:1"]);
        assert_eq!(decision.deny_reasons, vec![
            "Image 'a:1' for container 'a' failed scan policy check: first".to_owned(),
            "Image 'b:2' for container 'b' failed scan policy check: second".to_owned(),
            "Image 'c:3' for container 'c' failed scan policy check: third".to_owned(),
        ]);

        let patch = serde_json::to_value(build_patch(&pod, &decision.digests)).unwrap();
        let replaced: Vec<(&str, &str)> = patch
            .as_array()
            .unwrap()
            .iter()
            .filter(|op| op["op"] == "replace")
            .map(|op| (op["path"].as_str().unwrap(), op["value"].as_str().unwrap()))
            .collect();
        assert_eq!(replaced, vec![
            ("/spec/containers/0/image", "a@sha256:a"),
            ("/spec/containers/1/image", "b@sha256:b"),
            ("/spec/containers/2/image", "c@sha256:c"),
        ]);
    }

    #[tokio::test]
    async fn evaluation_can_run_on_a_spawned_task() {
        let scanner = Arc::new(MockScanner::new().digest("a:1", "sha256:a"));
        let aggregator = aggregator(scanner, Arc::new(MockEvaluator::new()));
        let pod = pod(&[("a", "a:1")]);
        let decision = tokio::spawn(async move {
            let request = AdmissionContext::new("uid");
            let rules = String::from("rules");
            aggregator
                .evaluate(&request, &pod, &rules, "{}", &CancellationToken::new())
                .await
        })
        .await
        .unwrap();
        assert!(decision.accepted);
    }
}
