//! In-memory scanner and policy engine for pipeline tests
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use imagescan_core::{ScanReport, ScanStatus};
use serde_json::{json, Value};

use crate::{
    policy::DENY_IMAGE_QUERY, Expression, PolicyError, PolicyEvaluator, ResultSet, ScanError, Scanner,
};

/// Scanner answering from fixed tables and recording every call.
///
/// Images without a digest entry fail `start_scan` terminally.
#[derive(Default)]
pub struct MockScanner {
    digests: HashMap<String, String>,
    pending: Mutex<HashMap<String, usize>>,
    no_report: HashSet<String>,
    statuses: HashMap<String, ScanStatus>,
    delays: HashMap<String, Duration>,
    start_calls: Mutex<Vec<String>>,
    report_calls: Mutex<Vec<(String, String, Option<String>)>>,
}

impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn digest(mut self, image: &str, digest: &str) -> Self {
        self.digests.insert(image.into(), digest.into());
        self
    }

    /// Report the digest of `image` as pending for the first `times` calls.
    pub fn pending(self, image: &str, times: usize) -> Self {
        self.pending.lock().unwrap().insert(image.into(), times);
        self
    }

    pub fn no_report(mut self, image: &str) -> Self {
        self.no_report.insert(image.into());
        self
    }

    pub fn status(mut self, image: &str, status: ScanStatus) -> Self {
        self.statuses.insert(image.into(), status);
        self
    }

    /// Make `start_scan` of `image` take `delay`.
    pub fn delay(mut self, image: &str, delay: Duration) -> Self {
        self.delays.insert(image.into(), delay);
        self
    }

    pub fn start_calls(&self) -> Vec<String> {
        self.start_calls.lock().unwrap().clone()
    }

    pub fn report_calls(&self) -> Vec<(String, String, Option<String>)> {
        self.report_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scanner for MockScanner {
    async fn start_scan(&self, image: &str) -> Result<String, ScanError> {
        if let Some(delay) = self.delays.get(image) {
            tokio::time::sleep(*delay).await;
        }
        self.start_calls.lock().unwrap().push(image.into());
        if let Some(left) = self.pending.lock().unwrap().get_mut(image) {
            if *left > 0 {
                *left -= 1;
                return Err(ScanError::DigestPending(image.into()));
            }
        }
        self.digests
            .get(image)
            .cloned()
            .ok_or_else(|| ScanError::backend(format!("image {image} not found")))
    }

    async fn get_report(
        &self,
        image: &str,
        digest: &str,
        policy_id: Option<&str>,
    ) -> Result<ScanReport, ScanError> {
        self.report_calls
            .lock()
            .unwrap()
            .push((image.into(), digest.into(), policy_id.map(Into::into)));
        if self.no_report.contains(image) {
            return Err(ScanError::backend("report not found"));
        }
        let status = self.statuses.get(image).copied().unwrap_or(ScanStatus::Accepted);
        let mut report = ScanReport::new(image, status);
        if let Some(id) = policy_id {
            report = report.with_policy_id(id);
        }
        Ok(report)
    }
}

/// One recorded [`MockEvaluator`] call.
#[derive(Clone, Debug)]
pub struct Call {
    pub query: String,
    pub rules: String,
    pub data: String,
    pub input: Value,
}

enum Answer {
    Violations(Vec<String>),
    Fail(String),
    Undefined,
}

/// Policy engine answering from fixed tables and recording every call.
///
/// Queries without a configured answer produce no violations. The container
/// query can also be answered per image.
#[derive(Default)]
pub struct MockEvaluator {
    answers: HashMap<String, Answer>,
    image_violations: HashMap<String, Vec<String>>,
    calls: Mutex<Vec<Call>>,
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn violations(mut self, query: &str, msgs: &[&str]) -> Self {
        let msgs = msgs.iter().map(|m| (*m).to_owned()).collect();
        self.answers.insert(query.into(), Answer::Violations(msgs));
        self
    }

    pub fn fail(mut self, query: &str, msg: &str) -> Self {
        self.answers.insert(query.into(), Answer::Fail(msg.into()));
        self
    }

    /// Answer `query` with no result, as for a rule the module does not define.
    pub fn undefined(mut self, query: &str) -> Self {
        self.answers.insert(query.into(), Answer::Undefined);
        self
    }

    pub fn deny_image(mut self, image: &str, msgs: &[&str]) -> Self {
        let msgs = msgs.iter().map(|m| (*m).to_owned()).collect();
        self.image_violations.insert(image.into(), msgs);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, query: &str) -> usize {
        self.calls().iter().filter(|c| c.query == query).count()
    }
}

fn result_of(query: &str, msgs: &[String]) -> Vec<ResultSet> {
    vec![vec![Expression {
        value: json!(msgs),
        text: query.to_owned(),
    }]]
}

#[async_trait]
impl PolicyEvaluator for MockEvaluator {
    async fn evaluate(
        &self,
        query: &str,
        rules: &str,
        data: &str,
        input: &Value,
    ) -> Result<Vec<ResultSet>, PolicyError> {
        self.calls.lock().unwrap().push(Call {
            query: query.into(),
            rules: rules.into(),
            data: data.into(),
            input: input.clone(),
        });
        match self.answers.get(query) {
            Some(Answer::Fail(msg)) => return Err(PolicyError::Engine(msg.clone())),
            Some(Answer::Violations(msgs)) => return Ok(result_of(query, msgs)),
            Some(Answer::Undefined) => return Ok(Vec::new()),
            None => {}
        }
        if query == DENY_IMAGE_QUERY {
            let image = input["ContainerObject"]["image"].as_str().unwrap_or_default();
            if let Some(msgs) = self.image_violations.get(image) {
                return Ok(result_of(query, msgs));
            }
        }
        Ok(result_of(query, &[]))
    }
}
