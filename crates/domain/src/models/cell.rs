use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{CellId, JobId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    Pending,
    InFlight,
    Success,
    Failed,
    TimedOut,
}

impl CellState {
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            CellState::Success | CellState::Failed | CellState::TimedOut
        )
    }
}

impl std::fmt::Display for CellState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellState::Pending => write!(f, "pending"),
            CellState::InFlight => write!(f, "in_flight"),
            CellState::Success => write!(f, "success"),
            CellState::Failed => write!(f, "failed"),
            CellState::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Failure taxonomy recorded on settled cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellErrorKind {
    Timeout,
    ConnectionError,
    RateLimited,
    ServerError,
    CircuitOpen,
    ProviderError,
    Unknown,
    /// Cell was still unsettled when the job deadline or the stall watchdog fired
    GlobalTimeout,
}

impl CellErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellErrorKind::Timeout => "timeout",
            CellErrorKind::ConnectionError => "connection_error",
            CellErrorKind::RateLimited => "rate_limited",
            CellErrorKind::ServerError => "server_error",
            CellErrorKind::CircuitOpen => "circuit_open",
            CellErrorKind::ProviderError => "provider_error",
            CellErrorKind::Unknown => "unknown",
            CellErrorKind::GlobalTimeout => "global_timeout",
        }
    }

    /// Errors that count against a provider's circuit breaker.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            CellErrorKind::Timeout
                | CellErrorKind::ConnectionError
                | CellErrorKind::RateLimited
                | CellErrorKind::ServerError
        )
    }

    /// Errors after which the next fallback model is worth trying.
    pub fn is_retryable(&self) -> bool {
        self.trips_breaker()
    }
}

impl std::fmt::Display for CellErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellError {
    pub kind: CellErrorKind,
    pub message: String,
    /// Model the failing attempt was sent to, if any attempt was made
    pub model: Option<String>,
}

impl CellError {
    pub fn new(kind: CellErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.model {
            Some(model) => write!(f, "[{}] {} ({})", self.kind, self.message, model),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Structured fields extracted from one raw answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFields {
    pub brand_mentioned: bool,
    /// 1..=10 when ranked, -1 when the brand is not mentioned
    pub rank: i32,
    /// Clamped to [-1.0, 1.0]
    pub sentiment: f64,
    pub cited_sources: Vec<String>,
}

impl Default for ParsedFields {
    fn default() -> Self {
        Self {
            brand_mentioned: false,
            rank: -1,
            sentiment: 0.0,
            cited_sources: Vec::new(),
        }
    }
}

impl ParsedFields {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_ranked(&self) -> bool {
        (1..=10).contains(&self.rank)
    }
}

/// Parser result. `parsed` tells a genuine "not mentioned" answer apart
/// from an answer the parser could not read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub fields: ParsedFields,
    pub parsed: bool,
    pub error: Option<String>,
}

impl ParseOutcome {
    pub fn parsed(fields: ParsedFields) -> Self {
        Self {
            fields,
            parsed: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            fields: ParsedFields::default(),
            parsed: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of executing one cell, produced by the call executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellResult {
    pub state: CellState,
    pub raw_answer: Option<String>,
    pub model_used: Option<String>,
    pub attempts: u32,
    pub error: Option<CellError>,
    pub latency_ms: Option<u64>,
}

impl CellResult {
    pub fn success(raw_answer: String, model_used: String, attempts: u32, latency_ms: u64) -> Self {
        Self {
            state: CellState::Success,
            raw_answer: Some(raw_answer),
            model_used: Some(model_used),
            attempts,
            error: None,
            latency_ms: Some(latency_ms),
        }
    }

    pub fn failure(state: CellState, error: CellError, attempts: u32) -> Self {
        Self {
            state,
            raw_answer: None,
            model_used: error.model.clone(),
            attempts,
            error: Some(error),
            latency_ms: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == CellState::Success
    }
}

/// One (brand, provider, question) unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub job_id: JobId,
    pub question: String,
    pub state: CellState,
    pub raw_answer: Option<String>,
    pub model_used: Option<String>,
    pub parsed_fields: Option<ParseOutcome>,
    pub attempts: u32,
    pub error: Option<CellError>,
    pub latency_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cell {
    pub fn new(job_id: JobId, id: CellId, question: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_id,
            question: question.into(),
            state: CellState::Pending,
            raw_answer: None,
            model_used: None,
            parsed_fields: None,
            attempts: 0,
            error: None,
            latency_ms: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn brand(&self) -> &str {
        &self.id.brand
    }

    /// Provider id this cell is routed to.
    pub fn model(&self) -> &str {
        &self.id.model
    }

    /// Question text with `{brand}` replaced by the cell's brand.
    pub fn prompt(&self) -> String {
        self.question.replace("{brand}", &self.id.brand)
    }

    pub fn is_settled(&self) -> bool {
        self.state.is_settled()
    }

    /// pending -> in_flight. Returns false if the cell already left pending.
    pub fn mark_in_flight(&mut self) -> bool {
        if self.state != CellState::Pending {
            return false;
        }
        self.state = CellState::InFlight;
        self.touch();
        true
    }

    /// Records the terminal outcome. A cell settles at most once; later
    /// calls are ignored and return false.
    pub fn settle(&mut self, result: CellResult) -> bool {
        if self.is_settled() || !result.state.is_settled() {
            return false;
        }
        self.state = result.state;
        self.raw_answer = result.raw_answer;
        self.model_used = result.model_used;
        self.attempts = result.attempts;
        self.error = result.error;
        self.latency_ms = result.latency_ms;
        self.touch();
        true
    }

    /// Settles an unsettled cell as timed out by the job-level deadline.
    pub fn force_timeout(&mut self, message: impl Into<String>) -> bool {
        let attempts = self.attempts;
        self.settle(CellResult::failure(
            CellState::TimedOut,
            CellError::new(CellErrorKind::GlobalTimeout, message),
            attempts,
        ))
    }

    fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}
