//! # Diagnosis Testing Utils
//!
//! Shared testing utilities for the brand diagnosis workspace: scripted
//! provider clients, parser and sink doubles, and data builders.
//!
//! ```toml
//! [dev-dependencies]
//! diagnosis-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
