use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::CellErrorKind;

/// One attempt against one model of one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    pub provider_id: String,
    pub model_id: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub raw_text: String,
}

impl ProviderResponse {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderCallError {
    #[error("调用超时: {0}")]
    Timeout(String),
    #[error("连接失败: {0}")]
    Connection(String),
    #[error("请求被限流: {message}{}", retry_hint(.retry_after))]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },
    #[error("服务端错误 (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("请求被拒绝 (HTTP {status}): {message}")]
    Client { status: u16, message: String },
    #[error("未知错误: {0}")]
    Other(String),
}

impl ProviderCallError {
    pub fn kind(&self) -> CellErrorKind {
        match self {
            ProviderCallError::Timeout(_) => CellErrorKind::Timeout,
            ProviderCallError::Connection(_) => CellErrorKind::ConnectionError,
            ProviderCallError::RateLimited { .. } => CellErrorKind::RateLimited,
            ProviderCallError::Server { .. } => CellErrorKind::ServerError,
            ProviderCallError::Client { .. } => CellErrorKind::ProviderError,
            ProviderCallError::Other(_) => CellErrorKind::Unknown,
        }
    }

    /// Server-requested wait before the next call, when a rate limit sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderCallError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (建议 {}s 后重试)", wait.as_secs()),
        None => String::new(),
    }
}

/// Answer-engine transport. Implementations do not retry; the call
/// executor owns retry and fallback.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn call(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderCallError>;
}
