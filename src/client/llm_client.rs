//! Generic LLM client for OpenAI-compatible endpoints.
//!
//! Epistemic foundation:
//! - K_i: OpenAI API schema is the de facto standard
//! - K_i: Aggregators (OpenRouter), research APIs (Perplexity) and on-prem
//!   servers (vLLM, Ollama) all support it
//! - B_i: API will respond within timeout (might fail)
//! - B_i: Response will be valid JSON (might fail)
//! - I^B: Network availability unknowable → the forecaster pool retries

use crate::models::{AugurError, AuthScheme, ModelSpec, Result};
use crate::pool::TransportFailure;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Message in a chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Generic LLM client for any OpenAI-compatible endpoint.
///
/// One `complete` call is one HTTP attempt; retrying is the caller's job.
pub struct LLMClient {
    client: reqwest::Client,
    /// Name of this endpoint (for logging)
    name: String,
    /// API key (None for local endpoints without auth)
    api_key: Option<String>,
    auth_scheme: AuthScheme,
    /// Base URL for the API
    base_url: String,
    /// Custom headers to include in requests
    custom_headers: HashMap<String, String>,
    timeout: Duration,
    /// Attempt ceiling advertised to the forecaster pool
    max_retries: u32,
}

impl LLMClient {
    /// Create a new LLM client.
    ///
    /// # Arguments
    /// - `name`: Endpoint name for logging (e.g., "openrouter", "perplexity")
    /// - `api_key`: Optional API key (None for local endpoints)
    /// - `auth_scheme`: How the key is sent
    /// - `base_url`: Base URL for the API
    /// - `custom_headers`: Additional headers to include in requests
    /// - `timeout_secs`: Per-call timeout in seconds
    /// - `max_retries`: Attempt ceiling per logical call
    pub fn new(
        name: String,
        api_key: Option<String>,
        auth_scheme: AuthScheme,
        base_url: String,
        custom_headers: HashMap<String, String>,
        timeout_secs: u64,
        max_retries: u32,
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
        })
    }

    /// Create an OpenRouter client.
    pub fn openrouter(
        api_key: String,
        base_url: Option<String>,
        timeout_secs: Option<u64>,
        max_retries: Option<u32>,
    ) -> Result<Self> {
        Self::new(
            crate::models::OPENROUTER.to_string(),
            Some(api_key),
            AuthScheme::Bearer,
            base_url.unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
            HashMap::new(),
            timeout_secs.unwrap_or(300),
            max_retries.unwrap_or(3),
        )
    }

    /// Get the endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Build headers for a request.
    fn headers(&self) -> HeaderMap {
        let mut headers = auth_headers(self.api_key.as_deref(), self.auth_scheme);

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // OpenRouter attribution headers (harmless for other providers)
        headers.insert(
            "HTTP-Referer",
            HeaderValue::from_static("https://github.com/infernet-org/augur"),
        );
        headers.insert("X-Title", HeaderValue::from_static("augur"));

        insert_custom_headers(&mut headers, &self.custom_headers);
        headers
    }

    /// Complete a chat request (single attempt).
    ///
    /// B_i(API available) → Result
    /// B_i(valid response) → Result
    pub async fn complete(
        &self,
        model: &ModelSpec,
        messages: Vec<Message>,
    ) -> std::result::Result<String, TransportFailure> {
        let start = Instant::now();

        let request = ChatCompletionRequest {
            model: &model.id,
            messages,
            max_tokens: model.max_tokens,
            temperature: model.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
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
            let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                .map(|e| e.error.message)
                .unwrap_or(error_body);
            return Err(TransportFailure::from_status(
                status.as_u16(),
                message,
                retry_after,
            ));
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| TransportFailure::InvalidResponse(format!("Failed to parse response: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TransportFailure::InvalidResponse("No choices in response".to_string()))?
            .message
            .content
            .ok_or_else(|| TransportFailure::InvalidResponse("Null content in response".to_string()))?;

        let usage = body.usage.unwrap_or_default();
        debug!(
            endpoint = %self.name,
            model = %model.id,
            served_by = body.model.as_deref().unwrap_or(&model.id),
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Completion received"
        );

        Ok(content)
    }

    /// Complete with optional system prompt and a user prompt.
    pub async fn complete_with_system(
        &self,
        model: &ModelSpec,
        system_prompt: Option<&str>,
        user_prompt: &str,
    ) -> std::result::Result<String, TransportFailure> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(user_prompt));
        self.complete(model, messages).await
    }


    /// Health check: ping the /models endpoint.
    ///
    /// K_i: endpoint is reachable and responding
    /// B_i: endpoint is healthy if /models returns 200
    pub async fn health_check(&self) -> HealthCheckResult {
        probe_models(&self.client, &self.name, &self.base_url, self.headers()).await
    }
}

/// Authorization headers for the given scheme.
pub(crate) fn auth_headers(api_key: Option<&str>, scheme: AuthScheme) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(key) = api_key else {
        return headers;
    };

    let (name, value) = match scheme {
        AuthScheme::Bearer => (AUTHORIZATION, format!("Bearer {key}")),
        AuthScheme::Token => (AUTHORIZATION, format!("Token {key}")),
        AuthScheme::XApiKey => (HeaderName::from_static("x-api-key"), key.to_string()),
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
    headers
}

/// Add user-configured headers, skipping any that are not valid HTTP.
pub(crate) fn insert_custom_headers(headers: &mut HeaderMap, custom: &HashMap<String, String>) {
    for (key, value) in custom {
        if let (Ok(name), Ok(val)) = (
            HeaderName::try_from(key.as_str()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, val);
        }
    }
}

/// Seconds from a `retry-after` header, if it is numeric.
pub(crate) fn retry_after_secs(headers: &HeaderMap) -> Option<f64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
}

/// GET `{base_url}/models` and report reachability.
pub(crate) async fn probe_models(
    client: &reqwest::Client,
    name: &str,
    base_url: &str,
    headers: HeaderMap,
) -> HealthCheckResult {
    let start = Instant::now();
    let url = format!("{base_url}/models");

    match client
        .get(&url)
        .headers(headers)
        .timeout(Duration::from_secs(10))
        .send()
        .await
    {
        Ok(response) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            if response.status().is_success() {
                HealthCheckResult {
                    endpoint: name.to_string(),
                    status: HealthStatus::Healthy,
                    latency_ms: Some(latency_ms),
                    error: None,
                }
            } else {
                HealthCheckResult {
                    endpoint: name.to_string(),
                    status: HealthStatus::Unhealthy,
                    latency_ms: Some(latency_ms),
                    error: Some(format!("HTTP {}", response.status().as_u16())),
                }
            }
        }
        Err(e) => HealthCheckResult {
            endpoint: name.to_string(),
            status: HealthStatus::Unreachable,
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

/// Result of a health check.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Endpoint name
    pub endpoint: String,
    pub status: HealthStatus,
    /// Latency in milliseconds (if reachable)
    pub latency_ms: Option<u64>,
    /// Error message (if unhealthy or unreachable)
    pub error: Option<String>,
}

/// Health status of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Endpoint is responding normally
    Healthy,
    /// Endpoint is responding but with errors
    Unhealthy,
    /// Endpoint is not reachable
    Unreachable,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_headers_per_scheme() {
        let bearer = auth_headers(Some("k"), AuthScheme::Bearer);
        assert_eq!(bearer[AUTHORIZATION], "Bearer k");

        let token = auth_headers(Some("k"), AuthScheme::Token);
        assert_eq!(token[AUTHORIZATION], "Token k");

        let x_api_key = auth_headers(Some("k"), AuthScheme::XApiKey);
        assert_eq!(x_api_key["x-api-key"], "k");
        assert!(x_api_key.get(AUTHORIZATION).is_none());

        assert!(auth_headers(None, AuthScheme::Bearer).is_empty());
    }

    #[test]
    fn test_custom_headers_skip_invalid() {
        let mut headers = HeaderMap::new();
        let custom = HashMap::from([
            ("X-Org".to_string(), "acme".to_string()),
            ("bad header".to_string(), "x".to_string()),
        ]);
        insert_custom_headers(&mut headers, &custom);
        assert_eq!(headers["x-org"], "acme");
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_secs(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("2.5"));
        assert_eq!(retry_after_secs(&headers), Some(2.5));
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after_secs(&headers), None);
    }

    #[test]
    fn test_request_omits_unset_temperature() {
        let request = ChatCompletionRequest {
            model: "openai/o4-mini",
            messages: vec![Message::user("hi")],
            max_tokens: 16000,
            temperature: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("temperature").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_response_with_null_content_parses() {
        let body: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"content": null}}], "model": "x"}"#,
        )
        .unwrap();
        assert!(body.choices[0].message.content.is_none());
        assert!(body.usage.is_none());
    }

    #[test]
    fn test_openrouter_defaults() {
        let client = LLMClient::openrouter("key".into(), None, None, None).unwrap();
        assert_eq!(client.name(), "openrouter");
        assert_eq!(client.base_url(), "https://openrouter.ai/api/v1");
        assert_eq!(client.max_retries(), 3);
    }

    #[tokio::test]
    async fn test_timeout_reports_configured_duration() {
        // Accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let e = client.get(format!("http://{addr}/v1/models")).send().await.unwrap_err();

        let err = TransportFailure::from_reqwest(e, Duration::from_secs(300));
        assert!(matches!(err, TransportFailure::Timeout(d) if d == Duration::from_secs(300)));
        assert_eq!(err.to_string(), "request timed out after 300s");
        server.abort();
    }
}
