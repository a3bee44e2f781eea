//! Binding of an endpoint client to one model.
//!
//! Epistemic foundation:
//! - K_i: A forecaster slot needs (client, model, system prompt)
//! - K_i: Wire protocol is chosen per endpoint, not per model

use crate::client::{AnthropicClient, HealthCheckResult, LLMClient};
use crate::models::ModelSpec;
use crate::pool::{ModelEndpoint, TransportFailure};
use async_trait::async_trait;
use std::sync::Arc;

/// A configured endpoint, by wire protocol.
#[derive(Clone)]
pub enum EndpointClient {
    OpenAi(Arc<LLMClient>),
    Anthropic(Arc<AnthropicClient>),
}

impl EndpointClient {
    pub fn name(&self) -> &str {
        match self {
            Self::OpenAi(c) => c.name(),
            Self::Anthropic(c) => c.name(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            Self::OpenAi(c) => c.max_retries(),
            Self::Anthropic(c) => c.max_retries(),
        }
    }

    /// One attempt: system prompt (optional) plus a single user prompt.
    pub async fn complete(
        &self,
        model: &ModelSpec,
        system_prompt: Option<&str>,
        prompt: &str,
    ) -> Result<String, TransportFailure> {
        match self {
            Self::OpenAi(c) => c.complete_with_system(model, system_prompt, prompt).await,
            Self::Anthropic(c) => c.complete(model, system_prompt, prompt).await,
        }
    }

    pub async fn health_check(&self) -> HealthCheckResult {
        match self {
            Self::OpenAi(c) => c.health_check().await,
            Self::Anthropic(c) => c.health_check().await,
        }
    }
}

/// A model on an endpoint, usable as a forecaster or research backend.
pub struct HttpModel {
    client: EndpointClient,
    model: ModelSpec,
    system_prompt: Option<Arc<str>>,
    label: String,
}

impl HttpModel {
    pub fn new(client: EndpointClient, model: ModelSpec) -> Self {
        let label = format!("{}:{}", client.name(), model.id);
        Self {
            client,
            model,
            system_prompt: None,
            label,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<Arc<str>>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }
}

#[async_trait]
impl ModelEndpoint for HttpModel {
    async fn invoke(&self, prompt: &str) -> Result<String, TransportFailure> {
        self.client
            .complete(&self.model, self.system_prompt.as_deref(), prompt)
            .await
    }

    fn max_attempts(&self) -> u32 {
        self.client.max_retries().max(1)
    }

    fn label(&self) -> &str {
        &self.label
    }
}
