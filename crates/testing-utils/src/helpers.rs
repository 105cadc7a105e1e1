//! Test helper utilities.

use std::time::Duration;

use tokio::time::{sleep, Instant};

pub struct TestEnv;

impl TestEnv {
    /// Polls `condition` until it holds or `timeout` elapses.
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// An answer text in the shape the JSON answer parser reads.
pub fn answer_json(rank: i32, sentiment: f64, sources: &[&str]) -> String {
    serde_json::json!({
        "brand_mentioned": rank > 0,
        "rank": rank,
        "sentiment": sentiment,
        "cited_sources": sources,
    })
    .to_string()
}
