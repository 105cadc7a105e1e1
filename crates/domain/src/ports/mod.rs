pub mod parser;
pub mod provider;
pub mod sink;
pub mod store;

pub use parser::AnswerParser;
pub use provider::{ProviderCallError, ProviderClient, ProviderRequest, ProviderResponse};
pub use sink::ReportSink;
pub use store::JobStore;
