pub mod aggregator;
pub mod scoring;

pub use aggregator::ResultAggregator;
