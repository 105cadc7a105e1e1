//! OpenAI-compatible chat-completions client.
//!
//! Most answer engines (DeepSeek, Qwen, Doubao, Kimi...) expose the same
//! `/chat/completions` shape, so one adapter serves every configured provider.

use std::time::Duration;

use async_trait::async_trait;
use diagnosis_config::ProviderConfig;
use diagnosis_domain::{
    DiagnosisError, DiagnosisResult, ProviderCallError, ProviderClient, ProviderRequest,
    ProviderResponse,
};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Error bodies are truncated to this many characters in messages.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    provider_id: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> DiagnosisResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| DiagnosisError::config_error(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            provider_id: provider_id.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Builds the client for one configured provider. The API key is read
    /// from the environment variable named by `api_key_env`.
    pub fn from_config(provider_id: &str, config: &ProviderConfig) -> DiagnosisResult<Self> {
        let base_url = config.base_url.as_deref().ok_or_else(|| {
            DiagnosisError::config_error(format!("providers.{provider_id}.base_url 未配置"))
        })?;

        let api_key = match &config.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.trim().is_empty() => Some(key),
                _ => {
                    warn!(provider = provider_id, env = %var, "API密钥环境变量未设置，将以匿名方式调用");
                    None
                }
            },
            None => None,
        };

        Self::new(provider_id, base_url, api_key)
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

fn classify_transport(err: reqwest::Error) -> ProviderCallError {
    if err.is_timeout() {
        ProviderCallError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        ProviderCallError::Connection(err.to_string())
    } else {
        ProviderCallError::Other(err.to_string())
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    async fn call(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderCallError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = request.system_prompt.as_deref() {
            messages.push(ApiMessage {
                role: "system",
                content: system_prompt,
            });
        }
        messages.push(ApiMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatApiRequest {
            model: &request.model_id,
            messages,
            temperature: 0.0,
        };

        let mut builder = self
            .client
            .post(self.chat_url())
            .timeout(request.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(classify_transport)?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.map_err(classify_transport)?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderCallError::RateLimited {
                retry_after,
                message: truncate(&text),
            });
        }
        if status.is_server_error() {
            return Err(ProviderCallError::Server {
                status: status.as_u16(),
                message: truncate(&text),
            });
        }
        if !status.is_success() {
            return Err(ProviderCallError::Client {
                status: status.as_u16(),
                message: truncate(&text),
            });
        }

        let parsed: ChatApiResponse = serde_json::from_str(&text)
            .map_err(|e| ProviderCallError::Other(format!("无法解析响应: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderCallError::Other("响应中没有回答内容".to_string()))?;

        debug!(
            provider = %self.provider_id,
            model = %request.model_id,
            answer_chars = content.chars().count(),
            "模型调用成功"
        );
        Ok(ProviderResponse::new(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = OpenAiCompatibleClient::new("deepseek", "https://api.deepseek.com/v1/", None).unwrap();
        assert_eq!(client.chat_url(), "https://api.deepseek.com/v1/chat/completions");
    }

    #[test]
    fn test_from_config_requires_base_url() {
        let config = ProviderConfig::with_models(["m"]);
        let err = OpenAiCompatibleClient::from_config("qwen", &config).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_truncate_is_char_safe() {
        let body = "错".repeat(1000);
        assert_eq!(truncate(&body).chars().count(), MAX_ERROR_BODY_CHARS);
    }
}
