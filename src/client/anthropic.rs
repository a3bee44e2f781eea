//! Anthropic Messages API client.
//!
//! Epistemic foundation:
//! - K_i: `/messages` returns a list of typed content blocks
//! - K_i: With extended thinking enabled, `thinking` blocks precede the answer
//! - B_i: At least one `text` block is present (might fail)
//! - I^B: Proxy availability unknowable → the forecaster pool retries

use crate::client::llm_client::{
    auth_headers, insert_custom_headers, probe_models, retry_after_secs,
};
use crate::client::HealthCheckResult;
use crate::models::{AugurError, AuthScheme, ModelSpec, Result};
use crate::pool::TransportFailure;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<SystemBlock<'a>>,
    messages: Vec<UserMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SystemBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
    cache_control: CacheControl,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

/// Client for the Anthropic Messages API (direct or via a proxy).
pub struct AnthropicClient {
    client: reqwest::Client,
    name: String,
    api_key: Option<String>,
    auth_scheme: AuthScheme,
    base_url: String,
    custom_headers: HashMap<String, String>,
    timeout: Duration,
    max_retries: u32,
    /// Extended-thinking budget; disabled when `None`
    thinking_budget: Option<u32>,
}

impl AnthropicClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        api_key: Option<String>,
        auth_scheme: AuthScheme,
        base_url: String,
        custom_headers: HashMap<String, String>,
        timeout_secs: u64,
        max_retries: u32,
        thinking_budget: Option<u32>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AugurError::Network)?;

        Ok(Self {
            client,
            name,
            api_key,
            auth_scheme,
            base_url: base_url.trim_end_matches('/').to_string(),
            custom_headers,
            timeout,
            max_retries,
            thinking_budget,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = auth_headers(self.api_key.as_deref(), self.auth_scheme);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        insert_custom_headers(&mut headers, &self.custom_headers);
        headers
    }

    fn build_request<'a>(
        &self,
        model: &'a ModelSpec,
        system_prompt: Option<&'a str>,
        prompt: &'a str,
    ) -> MessagesRequest<'a> {
        let thinking = self.thinking_budget.map(|budget_tokens| ThinkingConfig {
            kind: "enabled",
            budget_tokens,
        });

        let system = system_prompt
            .map(|text| SystemBlock {
                kind: "text",
                text,
                cache_control: CacheControl { kind: "ephemeral" },
            })
            .into_iter()
            .collect();

        MessagesRequest {
            model: &model.id,
            max_tokens: model.max_tokens,
            // The API rejects a temperature alongside extended thinking
            temperature: if thinking.is_some() {
                None
            } else {
                model.temperature
            },
            thinking,
            system,
            messages: vec![UserMessage {
                role: "user",
                content: prompt,
            }],
        }
    }

    /// Send one message (single attempt) and return the answer text.
    pub async fn complete(
        &self,
        model: &ModelSpec,
        system_prompt: Option<&str>,
        prompt: &str,
    ) -> std::result::Result<String, TransportFailure> {
        let start = Instant::now();
        let request = self.build_request(model, system_prompt, prompt);

        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&request)
            .send()
            .await
            .map_err(|e| TransportFailure::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicErrorResponse>(&error_body)
                .map(|e| e.error.message)
                .unwrap_or(error_body);
            return Err(TransportFailure::from_status(
                status.as_u16(),
                message,
                retry_after,
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportFailure::InvalidResponse(e.to_string()))?;
        let (text, thinking) = parse_messages_body(&body)?;

        if let Some(thinking) = &thinking {
            debug!(endpoint = %self.name, chars = thinking.len(), "Thinking block received");
        }
        debug!(
            endpoint = %self.name,
            model = %model.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Message received"
        );

        Ok(text)
    }

    pub async fn health_check(&self) -> HealthCheckResult {
        probe_models(&self.client, &self.name, &self.base_url, self.headers()).await
    }
}

/// Pull the answer (last `text` block) and any thinking out of a response body.
fn parse_messages_body(
    body: &str,
) -> std::result::Result<(String, Option<String>), TransportFailure> {
    let parsed: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| TransportFailure::InvalidResponse(format!("Failed to parse response: {e}")))?;

    let mut text = None;
    let mut thinking = None;
    for block in parsed.content {
        match block {
            ContentBlock::Text { text: t } => text = Some(t),
            ContentBlock::Thinking { thinking: t } => thinking = Some(t),
            ContentBlock::Other => {}
        }
    }

    let text = text.ok_or_else(|| {
        TransportFailure::InvalidResponse("No text block in response".to_string())
    })?;
    Ok((text, thinking))
}
