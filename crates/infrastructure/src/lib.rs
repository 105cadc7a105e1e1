pub mod answer_parser;
pub mod circuit_breaker;
pub mod job_store;
pub mod observability;
pub mod provider_client;
pub mod report_sink;

pub use answer_parser::JsonAnswerParser;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerSnapshot};
pub use job_store::InMemoryJobStore;
pub use observability::{init_logging, init_metrics, init_observability, MetricsCollector};
pub use provider_client::OpenAiCompatibleClient;
pub use report_sink::{JsonFileReportSink, LoggingReportSink};
