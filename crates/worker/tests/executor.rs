use std::sync::Arc;
use std::time::Duration;

use diagnosis_config::CircuitState;
use diagnosis_domain::{CellErrorKind, CellState, ProviderCallError};
use diagnosis_infrastructure::CircuitBreakerRegistry;
use diagnosis_testing_utils::{breaker_config, test_profile, CellBuilder, MockBehavior, MockProviderClient};
use diagnosis_worker::{CallExecutor, ProviderClientRegistry};

fn executor_with(client: MockProviderClient, failure_threshold: usize) -> CallExecutor {
    let clients = ProviderClientRegistry::new().with_client("deepseek", Arc::new(client));
    let breakers = CircuitBreakerRegistry::new(breaker_config(failure_threshold, 60));
    CallExecutor::new(Arc::new(clients), Arc::new(breakers))
}

fn server_error() -> ProviderCallError {
    ProviderCallError::Server {
        status: 503,
        message: "service unavailable".to_string(),
    }
}

#[tokio::test]
async fn test_success_on_primary_model() {
    let client = MockProviderClient::succeeding("answer");
    let executor = executor_with(client.clone(), 5);
    let profile = test_profile("deepseek", &["deepseek-chat", "deepseek-reasoner"]);
    let cell = CellBuilder::new("Acme", "deepseek", 0).build();

    let result = executor.execute(&cell, &profile).await;

    assert_eq!(result.state, CellState::Success);
    assert_eq!(result.raw_answer.as_deref(), Some("answer"));
    assert_eq!(result.model_used.as_deref(), Some("deepseek-chat"));
    assert_eq!(result.attempts, 1);
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_falls_back_to_next_model_on_retryable_error() {
    let client = MockProviderClient::succeeding("fallback answer")
        .with_model("deepseek-chat", MockBehavior::Fail(server_error()));
    let executor = executor_with(client.clone(), 5);
    let profile = test_profile("deepseek", &["deepseek-chat", "deepseek-reasoner"]);
    let cell = CellBuilder::new("Acme", "deepseek", 0).build();

    let result = executor.execute(&cell, &profile).await;

    assert_eq!(result.state, CellState::Success);
    assert_eq!(result.model_used.as_deref(), Some("deepseek-reasoner"));
    assert_eq!(result.attempts, 2);
    assert_eq!(client.calls_for("deepseek-chat"), 1);
    assert_eq!(client.calls_for("deepseek-reasoner"), 1);

    // one failure then one success: the breaker stays closed with a clean streak
    let snapshot = executor.breakers().get("deepseek").snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.consecutive_failures, 0);
}

#[tokio::test]
async fn test_provider_error_stops_without_fallback_or_breaker_count() {
    let client = MockProviderClient::failing(ProviderCallError::Client {
        status: 400,
        message: "invalid model".to_string(),
    });
    let executor = executor_with(client.clone(), 1);
    let profile = test_profile("deepseek", &["deepseek-chat", "deepseek-reasoner"]);
    let cell = CellBuilder::new("Acme", "deepseek", 0).build();

    let result = executor.execute(&cell, &profile).await;

    assert_eq!(result.state, CellState::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, CellErrorKind::ProviderError);
    assert_eq!(error.model.as_deref(), Some("deepseek-chat"));
    assert_eq!(result.attempts, 1);
    assert_eq!(client.call_count(), 1);
    assert_eq!(executor.breakers().get("deepseek").state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_open_breaker_fails_fast_without_calling() {
    let client = MockProviderClient::succeeding("answer");
    let executor = executor_with(client.clone(), 5);
    executor.breakers().get("deepseek").force_open();
    let profile = test_profile("deepseek", &["deepseek-chat"]);
    let cell = CellBuilder::new("Acme", "deepseek", 0).build();

    let result = executor.execute(&cell, &profile).await;

    assert_eq!(result.state, CellState::Failed);
    assert_eq!(result.error.unwrap().kind, CellErrorKind::CircuitOpen);
    assert_eq!(result.attempts, 1);
    assert_eq!(client.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_models_time_out_each_attempt() {
    let client = MockProviderClient::hanging();
    let executor = executor_with(client.clone(), 5);
    let profile = test_profile("deepseek", &["deepseek-chat", "deepseek-reasoner"]);
    let cell = CellBuilder::new("Acme", "deepseek", 0).build();

    let started = tokio::time::Instant::now();
    let result = executor.execute(&cell, &profile).await;

    assert_eq!(result.state, CellState::TimedOut);
    assert_eq!(result.error.unwrap().kind, CellErrorKind::Timeout);
    assert_eq!(result.attempts, 2);
    assert_eq!(client.call_count(), 2);
    assert!(started.elapsed() >= Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_slow_answer_within_timeout_succeeds() {
    let client = MockProviderClient::new(MockBehavior::Delay(Duration::from_secs(3), "slow".to_string()));
    let executor = executor_with(client, 5);
    let profile = test_profile("deepseek", &["deepseek-chat"]);
    let cell = CellBuilder::new("Acme", "deepseek", 0).build();

    let result = executor.execute(&cell, &profile).await;

    assert_eq!(result.state, CellState::Success);
    assert!(result.latency_ms.unwrap() >= 3000);
}

#[tokio::test]
async fn test_max_attempts_caps_fallback_chain() {
    let client = MockProviderClient::failing(server_error());
    let executor = executor_with(client.clone(), 10);
    let profile = test_profile("deepseek", &["a", "b", "c"]).with_max_attempts(2);
    let cell = CellBuilder::new("Acme", "deepseek", 0).build();

    let result = executor.execute(&cell, &profile).await;

    assert_eq!(result.state, CellState::Failed);
    assert_eq!(result.attempts, 2);
    assert_eq!(client.calls_for("c"), 0);
    let error = result.error.unwrap();
    assert_eq!(error.kind, CellErrorKind::ServerError);
    assert_eq!(error.model.as_deref(), Some("b"));
}

#[tokio::test]
async fn test_breaker_opening_mid_cell_reports_last_real_error() {
    let client = MockProviderClient::failing(server_error());
    let executor = executor_with(client.clone(), 1);
    let profile = test_profile("deepseek", &["deepseek-chat", "deepseek-reasoner"]);
    let cell = CellBuilder::new("Acme", "deepseek", 0).build();

    let result = executor.execute(&cell, &profile).await;

    assert_eq!(client.call_count(), 1);
    assert_eq!(result.attempts, 1);
    assert_eq!(result.error.unwrap().kind, CellErrorKind::ServerError);
    assert_eq!(executor.breakers().get("deepseek").state(), CircuitState::Open);
}

#[tokio::test]
async fn test_breaker_trips_across_cells() {
    let client = MockProviderClient::failing(ProviderCallError::Connection("refused".to_string()));
    let executor = executor_with(client.clone(), 2);
    let profile = test_profile("deepseek", &["deepseek-chat"]);

    let mut kinds = Vec::new();
    for index in 0..4 {
        let cell = CellBuilder::new("Acme", "deepseek", index).build();
        let result = executor.execute(&cell, &profile).await;
        kinds.push(result.error.unwrap().kind);
    }

    assert_eq!(
        kinds,
        vec![
            CellErrorKind::ConnectionError,
            CellErrorKind::ConnectionError,
            CellErrorKind::CircuitOpen,
            CellErrorKind::CircuitOpen,
        ]
    );
    assert_eq!(client.call_count(), 2);
    assert_eq!(executor.breakers().get("deepseek").snapshot().rejected_calls, 2);
}

#[tokio::test]
async fn test_missing_client_is_unknown_failure() {
    let executor = CallExecutor::new(
        Arc::new(ProviderClientRegistry::new()),
        Arc::new(CircuitBreakerRegistry::default()),
    );
    let profile = test_profile("kimi", &["moonshot-v1-8k"]);
    let cell = CellBuilder::new("Acme", "kimi", 0).build();

    let result = executor.execute(&cell, &profile).await;

    assert_eq!(result.state, CellState::Failed);
    assert_eq!(result.error.unwrap().kind, CellErrorKind::Unknown);
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_request_carries_prompt_and_system_prompt() {
    let client = MockProviderClient::succeeding("answer");
    let executor = executor_with(client.clone(), 5).with_system_prompt(Some("只输出JSON".to_string()));
    let profile = test_profile("deepseek", &["deepseek-chat"]);
    let cell = CellBuilder::new("Acme", "deepseek", 0)
        .with_question("{brand} 在行业中的排名如何？")
        .build();

    executor.execute(&cell, &profile).await;

    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].prompt, "Acme 在行业中的排名如何？");
    assert_eq!(requests[0].system_prompt.as_deref(), Some("只输出JSON"));
    assert_eq!(requests[0].timeout, Duration::from_secs(5));
}

#[tokio::test]
async fn test_latency_history_records_every_attempt() {
    let client = MockProviderClient::succeeding("ok").with_model("a", MockBehavior::Fail(server_error()));
    let executor = executor_with(client, 5);
    let profile = test_profile("deepseek", &["a", "b"]);
    let cell = CellBuilder::new("Acme", "deepseek", 0).build();

    executor.execute(&cell, &profile).await;

    let stats = executor.latency_history().stats("deepseek").unwrap();
    assert_eq!(stats.count, 2);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_rate_limit_wait_is_reported_on_the_cell() {
    let client = MockProviderClient::new(MockBehavior::Fail(ProviderCallError::RateLimited {
        retry_after: Some(Duration::from_secs(3)),
        message: "too many requests".to_string(),
    }));
    let executor = executor_with(client.clone(), 5);
    let profile = test_profile("deepseek", &["deepseek-chat"]);
    let cell = CellBuilder::new("Acme", "deepseek", 0).build();

    let result = executor.execute(&cell, &profile).await;

    assert_eq!(result.state, CellState::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, CellErrorKind::RateLimited);
    assert!(error.message.contains("3s"), "unexpected message: {}", error.message);
    assert_eq!(client.call_count(), 1);
}
