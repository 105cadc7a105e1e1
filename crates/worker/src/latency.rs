//! Per-provider latency history for monitoring. Not consulted for any
//! execution decision.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySample {
    pub model: String,
    pub elapsed: Duration,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub provider_id: String,
    pub count: usize,
    pub success_rate: f64,
    pub avg_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
}

/// Bounded ring of the most recent attempts per provider.
pub struct LatencyHistory {
    capacity: usize,
    samples: Mutex<HashMap<String, VecDeque<LatencySample>>>,
}

impl LatencyHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, provider_id: &str, model: &str, elapsed: Duration, success: bool) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let ring = samples
            .entry(provider_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(LatencySample {
            model: model.to_string(),
            elapsed,
            success,
        });
    }

    pub fn samples(&self, provider_id: &str) -> Vec<LatencySample> {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples
            .get(provider_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self, provider_id: &str) -> Option<LatencyStats> {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples
            .get(provider_id)
            .filter(|ring| !ring.is_empty())
            .map(|ring| compute_stats(provider_id, ring))
    }

    /// Stats for every provider seen so far, ordered by provider id.
    pub fn all_stats(&self) -> Vec<LatencyStats> {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<_> = samples
            .iter()
            .filter(|(_, ring)| !ring.is_empty())
            .map(|(id, ring)| compute_stats(id, ring))
            .collect();
        stats.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        stats
    }
}

impl Default for LatencyHistory {
    fn default() -> Self {
        Self::new(256)
    }
}

fn compute_stats(provider_id: &str, ring: &VecDeque<LatencySample>) -> LatencyStats {
    let mut millis: Vec<u64> = ring.iter().map(|s| s.elapsed.as_millis() as u64).collect();
    millis.sort_unstable();
    let count = millis.len();
    let successes = ring.iter().filter(|s| s.success).count();
    // nearest-rank percentile
    let percentile = |p: f64| {
        let rank = ((p * count as f64).ceil() as usize).clamp(1, count);
        millis[rank - 1]
    };
    LatencyStats {
        provider_id: provider_id.to_string(),
        count,
        success_rate: successes as f64 / count as f64,
        avg_ms: millis.iter().sum::<u64>() as f64 / count as f64,
        p50_ms: percentile(0.5),
        p95_ms: percentile(0.95),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_is_bounded() {
        let history = LatencyHistory::new(3);
        for ms in [10, 20, 30, 40] {
            history.record("deepseek", "deepseek-chat", Duration::from_millis(ms), true);
        }
        let samples = history.samples("deepseek");
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].elapsed, Duration::from_millis(20));
    }

    #[test]
    fn test_stats() {
        let history = LatencyHistory::new(100);
        for ms in 1..=20 {
            history.record("qwen", "qwen-plus", Duration::from_millis(ms * 10), ms % 4 != 0);
        }
        let stats = history.stats("qwen").unwrap();
        assert_eq!(stats.count, 20);
        assert_eq!(stats.success_rate, 0.75);
        assert_eq!(stats.avg_ms, 105.0);
        assert_eq!(stats.p50_ms, 100);
        assert_eq!(stats.p95_ms, 190);

        assert!(history.stats("kimi").is_none());
        assert_eq!(history.all_stats().len(), 1);
    }
}
