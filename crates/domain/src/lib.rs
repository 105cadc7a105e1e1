pub mod models;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use diagnosis_errors::{DiagnosisError, DiagnosisResult};
pub use models::*;
pub use ports::*;
pub use services::{scoring, ResultAggregator};
pub use value_objects::*;
