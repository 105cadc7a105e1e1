use std::collections::HashMap;
use std::sync::Arc;

use diagnosis_config::AppConfig;
use diagnosis_domain::{DiagnosisResult, ProviderClient};
use diagnosis_infrastructure::OpenAiCompatibleClient;
use tracing::{info, warn};

/// Maps provider ids to their transport. A default client, when set, serves
/// providers without a dedicated entry.
#[derive(Default, Clone)]
pub struct ProviderClientRegistry {
    clients: HashMap<String, Arc<dyn ProviderClient>>,
    default_client: Option<Arc<dyn ProviderClient>>,
}

impl ProviderClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One OpenAI-compatible client per provider that has a `base_url`.
    pub fn from_config(config: &AppConfig) -> DiagnosisResult<Self> {
        let mut registry = Self::new();
        for (id, provider) in &config.providers {
            if provider.base_url.is_none() {
                warn!(provider = %id, "未配置 base_url，跳过创建HTTP客户端");
                continue;
            }
            let client = OpenAiCompatibleClient::from_config(id, provider)?;
            registry.insert(id, Arc::new(client));
            info!(provider = %id, models = ?provider.models, "模型提供方客户端已创建");
        }
        Ok(registry)
    }

    pub fn with_client(mut self, provider_id: &str, client: Arc<dyn ProviderClient>) -> Self {
        self.insert(provider_id, client);
        self
    }

    pub fn with_default(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.default_client = Some(client);
        self
    }

    pub fn insert(&mut self, provider_id: &str, client: Arc<dyn ProviderClient>) {
        self.clients.insert(provider_id.to_string(), client);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderClient>> {
        self.clients
            .get(provider_id)
            .or(self.default_client.as_ref())
            .cloned()
    }

    pub fn contains(&self, provider_id: &str) -> bool {
        self.default_client.is_some() || self.clients.contains_key(provider_id)
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for ProviderClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClientRegistry")
            .field("providers", &self.provider_ids())
            .field("has_default", &self.default_client.is_some())
            .finish()
    }
}
