pub mod app_config;
pub mod dispatcher_worker;
pub mod observability;
pub mod provider;

pub use app_config::*;
pub use dispatcher_worker::*;
pub use observability::*;
pub use provider::*;
