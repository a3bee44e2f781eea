//! Endpoint registry for managing multiple LLM endpoints.
//!
//! Epistemic foundation:
//! - K_i: OpenRouter is the default endpoint
//! - K_i: Other endpoints speak OpenAI or Anthropic wire protocol
//! - B_i: Endpoints are reachable (verified via health checks)
//! - I^R: User configures which endpoints and forecasters to use

use crate::client::{
    AnthropicClient, EndpointClient, HealthCheckResult, HealthStatus, HttpModel, LLMClient,
};
use crate::models::{
    Config, ConfigError, EndpointKind, ModelSpec, OPENROUTER, expand_headers,
};
use crate::pool::{ForecasterPool, ForecasterSlot, ModelEndpoint, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Registry of configured LLM endpoints.
///
/// "openrouter" is always present. Additional endpoints come from
/// `[endpoints.<name>]`.
///
/// # Example
///
/// ```ignore
/// use augur::{Config, EndpointRegistry};
///
/// let config = Config::from_file("config.toml".as_ref())?;
/// let registry = EndpointRegistry::from_config(&config)?;
/// let pool = registry.build_pool(&config, None)?;
/// ```
pub struct EndpointRegistry {
    endpoints: HashMap<String, EndpointClient>,
}

impl EndpointRegistry {
    /// Build registry from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingApiKey` if an endpoint requires an API key
    /// but none is configured or found in environment variables.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut endpoints = HashMap::new();

        let openrouter_api_key = config.resolve_api_key()?;
        let openrouter = LLMClient::openrouter(
            openrouter_api_key,
            Some(config.openrouter.base_url.clone()),
            Some(config.openrouter.timeout_secs),
            Some(config.openrouter.max_retries),
        )
        .map_err(|e| ConfigError::Invalid(format!("Failed to create OpenRouter client: {e}")))?;
        endpoints.insert(
            OPENROUTER.to_string(),
            EndpointClient::OpenAi(Arc::new(openrouter)),
        );

        for (name, endpoint_config) in &config.endpoints {
            let api_key = config.resolve_endpoint_api_key(name)?;
            let headers = expand_headers(&endpoint_config.headers);

            let client = match endpoint_config.kind {
                EndpointKind::OpenAi => LLMClient::new(
                    name.clone(),
                    api_key,
                    endpoint_config.auth_scheme,
                    endpoint_config.base_url.clone(),
                    headers,
                    endpoint_config.timeout_secs,
                    endpoint_config.max_retries,
                )
                .map(|c| EndpointClient::OpenAi(Arc::new(c))),
                EndpointKind::Anthropic => AnthropicClient::new(
                    name.clone(),
                    api_key,
                    endpoint_config.auth_scheme,
                    endpoint_config.base_url.clone(),
                    headers,
                    endpoint_config.timeout_secs,
                    endpoint_config.max_retries,
                    endpoint_config.thinking_budget,
                )
                .map(|c| EndpointClient::Anthropic(Arc::new(c))),
            }
            .map_err(|e| ConfigError::Invalid(format!("Failed to create '{name}' client: {e}")))?;

            endpoints.insert(name.clone(), client);
        }

        Ok(Self { endpoints })
    }

    /// Get client by endpoint name.
    pub fn get(&self, name: &str) -> Option<&EndpointClient> {
        self.endpoints.get(name)
    }

    /// Get all endpoint names, sorted.
    pub fn endpoint_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Bind a model to its endpoint.
    pub fn model(
        &self,
        spec: &ModelSpec,
        system_prompt: Option<Arc<str>>,
    ) -> Result<Arc<dyn ModelEndpoint>, ConfigError> {
        let client = self
            .get(&spec.endpoint)
            .ok_or_else(|| ConfigError::EndpointNotFound(spec.endpoint.clone()))?;
        Ok(Arc::new(
            HttpModel::new(client.clone(), spec.clone()).with_system_prompt(system_prompt),
        ))
    }

    /// Build the forecaster pool: slot ids are 1-based in config order.
    pub fn build_pool(
        &self,
        config: &Config,
        system_prompt: Option<Arc<str>>,
    ) -> Result<ForecasterPool, ConfigError> {
        let mut slots = Vec::with_capacity(config.forecasters.len());
        for (index, forecaster) in config.forecasters.iter().enumerate() {
            let primary = self.model(&forecaster.model, system_prompt.clone())?;
            let mut slot = ForecasterSlot::new(index as u32 + 1, forecaster.label(), primary);
            if let Some(fallback) = &forecaster.fallback {
                slot = slot.with_fallback(self.model(fallback, system_prompt.clone())?);
            }
            slots.push(slot);
        }

        ForecasterPool::new(slots, RetryPolicy::from(&config.retry))
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Research backend, if research is enabled.
    pub fn research_model(
        &self,
        config: &Config,
    ) -> Result<Option<Arc<dyn ModelEndpoint>>, ConfigError> {
        config
            .research_model()
            .map(|spec| self.model(spec, None))
            .transpose()
    }

    /// Run health checks on all endpoints.
    pub async fn health_check_all(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::new();

        for name in self.endpoint_names() {
            let result = self.endpoints[name].health_check().await;

            match result.status {
                HealthStatus::Healthy => {
                    info!(
                        endpoint = %name,
                        latency_ms = result.latency_ms.unwrap_or_default(),
                        "Endpoint healthy"
                    );
                }
                HealthStatus::Unhealthy => {
                    warn!(
                        endpoint = %name,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Endpoint unhealthy"
                    );
                }
                HealthStatus::Unreachable => {
                    warn!(
                        endpoint = %name,
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Endpoint unreachable"
                    );
                }
            }

            results.push(result);
        }

        results
    }

    /// Validate that all referenced endpoints exist in the registry.
    pub fn validate_model_endpoints(&self, config: &Config) -> Result<(), ConfigError> {
        for endpoint_name in config.referenced_endpoints() {
            if !self.endpoints.contains_key(&endpoint_name) {
                return Err(ConfigError::EndpointNotFound(endpoint_name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EndpointConfig, ForecasterConfig};

    fn config() -> Config {
        let mut config = Config::default();
        config.openrouter.api_key = Some("or-key".to_string());
        config.endpoints.insert(
            "metaculus".to_string(),
            EndpointConfig {
                kind: EndpointKind::Anthropic,
                base_url: "https://llm-proxy.example.com/proxy/anthropic/v1".to_string(),
                api_key: Some("tok".to_string()),
                max_retries: 7,
                thinking_budget: Some(12000),
                ..EndpointConfig::default()
            },
        );
        config
    }

    #[test]
    fn test_registry_builds_all_endpoints() {
        let registry = EndpointRegistry::from_config(&config()).unwrap();
        assert_eq!(registry.endpoint_names(), vec!["metaculus", "openrouter"]);
        assert!(matches!(
            registry.get("metaculus"),
            Some(EndpointClient::Anthropic(_))
        ));
        assert_eq!(registry.get("metaculus").unwrap().max_retries(), 7);
    }

    #[test]
    fn test_build_pool_with_fallback() {
        let mut config = config();
        config.forecasters = vec![
            ForecasterConfig {
                label: Some("claude".to_string()),
                model: ModelSpec {
                    endpoint: "metaculus".to_string(),
                    ..ModelSpec::openrouter("claude-sonnet-4-20250514")
                },
                fallback: Some(ModelSpec::openrouter("anthropic/claude-sonnet-4")),
            },
            ForecasterConfig {
                label: None,
                model: ModelSpec::openrouter("openai/o4-mini"),
                fallback: None,
            },
        ];

        let registry = EndpointRegistry::from_config(&config).unwrap();
        registry.validate_model_endpoints(&config).unwrap();
        let pool = registry.build_pool(&config, None).unwrap();

        let slots = pool.slots();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].id, 1);
        assert_eq!(slots[0].label, "claude");
        assert_eq!(slots[0].primary.label(), "metaculus:claude-sonnet-4-20250514");
        assert_eq!(slots[0].primary.max_attempts(), 7);
        assert_eq!(
            slots[0].fallback.as_ref().map(|f| f.label().to_string()),
            Some("openrouter:anthropic/claude-sonnet-4".to_string())
        );
        assert_eq!(slots[1].label, "openai/o4-mini");
        assert!(slots[1].fallback.is_none());
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let mut config = config();
        config.forecasters[0].model.endpoint = "nowhere".to_string();

        let registry = EndpointRegistry::from_config(&config).unwrap();
        assert!(matches!(
            registry.validate_model_endpoints(&config),
            Err(ConfigError::EndpointNotFound(name)) if name == "nowhere"
        ));
        assert!(matches!(
            registry.build_pool(&config, None),
            Err(ConfigError::EndpointNotFound(_))
        ));
    }

    #[test]
    fn test_research_model_only_when_enabled() {
        let mut config = config();
        config.research.model = Some(ModelSpec::openrouter("perplexity/sonar"));
        let registry = EndpointRegistry::from_config(&config).unwrap();
        assert!(registry.research_model(&config).unwrap().is_none());

        config.research.enabled = true;
        let research = registry.research_model(&config).unwrap().unwrap();
        assert_eq!(research.label(), "openrouter:perplexity/sonar");
    }
}
