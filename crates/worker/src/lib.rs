pub mod client_registry;
pub mod executor;
pub mod latency;

pub use client_registry::ProviderClientRegistry;
pub use executor::CallExecutor;
pub use latency::{LatencyHistory, LatencySample, LatencyStats};
