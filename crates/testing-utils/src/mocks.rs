//! Test doubles for the collaborator ports.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use diagnosis_domain::{
    AnswerParser, DiagnosisError, DiagnosisResult, JobSnapshot, ParseOutcome, ParsedFields,
    ProviderCallError, ProviderClient, ProviderRequest, ProviderResponse, ReportSink,
};

/// What a scripted provider does for one call.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed(String),
    Fail(ProviderCallError),
    /// Answer after a delay (tokio time, so paused clocks apply)
    Delay(Duration, String),
    /// Never answer; only the caller's timeout ends the call
    Hang,
}

/// Scripted `ProviderClient`. Per-model sequences are consumed first, then the
/// per-model behavior, then the client default.
#[derive(Debug, Clone)]
pub struct MockProviderClient {
    default: MockBehavior,
    per_model: Arc<Mutex<HashMap<String, MockBehavior>>>,
    sequences: Arc<Mutex<HashMap<String, VecDeque<MockBehavior>>>>,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
}

impl MockProviderClient {
    pub fn new(default: MockBehavior) -> Self {
        Self {
            default,
            per_model: Arc::new(Mutex::new(HashMap::new())),
            sequences: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding(answer: impl Into<String>) -> Self {
        Self::new(MockBehavior::Succeed(answer.into()))
    }

    pub fn failing(error: ProviderCallError) -> Self {
        Self::new(MockBehavior::Fail(error))
    }

    pub fn hanging() -> Self {
        Self::new(MockBehavior::Hang)
    }

    pub fn with_model(self, model: &str, behavior: MockBehavior) -> Self {
        self.per_model
            .lock()
            .unwrap()
            .insert(model.to_string(), behavior);
        self
    }

    pub fn with_sequence(self, model: &str, behaviors: Vec<MockBehavior>) -> Self {
        self.sequences
            .lock()
            .unwrap()
            .insert(model.to_string(), behaviors.into());
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.model_id == model)
            .count()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_behavior(&self, model: &str) -> MockBehavior {
        if let Some(next) = self
            .sequences
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(VecDeque::pop_front)
        {
            return next;
        }
        self.per_model
            .lock()
            .unwrap()
            .get(model)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    async fn call(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderCallError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.next_behavior(&request.model_id) {
            MockBehavior::Succeed(answer) => Ok(ProviderResponse::new(answer)),
            MockBehavior::Fail(error) => Err(error),
            MockBehavior::Delay(delay, answer) => {
                tokio::time::sleep(delay).await;
                Ok(ProviderResponse::new(answer))
            }
            MockBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(ProviderCallError::Other("unreachable".to_string()))
            }
        }
    }
}

/// Parser double: fixed fields per brand, or a parse failure for answers
/// listed as unreadable.
#[derive(Debug, Clone)]
pub struct MockAnswerParser {
    default: ParsedFields,
    per_brand: HashMap<String, ParsedFields>,
    unreadable: Vec<String>,
    calls: Arc<Mutex<usize>>,
}

impl MockAnswerParser {
    pub fn new(default: ParsedFields) -> Self {
        Self {
            default,
            per_brand: HashMap::new(),
            unreadable: Vec::new(),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    pub fn ranked(rank: i32, sentiment: f64) -> Self {
        Self::new(ParsedFields {
            brand_mentioned: rank > 0,
            rank,
            sentiment,
            cited_sources: Vec::new(),
        })
    }

    pub fn with_brand(mut self, brand: &str, fields: ParsedFields) -> Self {
        self.per_brand.insert(brand.to_string(), fields);
        self
    }

    /// Answers exactly equal to `raw_text` fail to parse.
    pub fn with_unreadable(mut self, raw_text: &str) -> Self {
        self.unreadable.push(raw_text.to_string());
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl AnswerParser for MockAnswerParser {
    fn parse(&self, brand: &str, raw_text: &str) -> ParseOutcome {
        *self.calls.lock().unwrap() += 1;
        if self.unreadable.iter().any(|u| u == raw_text) {
            return ParseOutcome::failed("mock: unreadable answer");
        }
        ParseOutcome::parsed(
            self.per_brand
                .get(brand)
                .cloned()
                .unwrap_or_else(|| self.default.clone()),
        )
    }
}

/// Captures delivered snapshots; can be told to fail every delivery.
#[derive(Debug, Clone, Default)]
pub struct RecordingReportSink {
    delivered: Arc<Mutex<Vec<JobSnapshot>>>,
    fail: bool,
}

impl RecordingReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn delivered(&self) -> Vec<JobSnapshot> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl ReportSink for RecordingReportSink {
    async fn deliver(&self, snapshot: &JobSnapshot) -> DiagnosisResult<()> {
        self.delivered.lock().unwrap().push(snapshot.clone());
        if self.fail {
            return Err(DiagnosisError::ReportDelivery("mock sink failure".to_string()));
        }
        Ok(())
    }
}
