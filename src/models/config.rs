//! Configuration models for augur.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns once at startup via the config file;
//! the resulting `Config` is read-only for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Name of the built-in endpoint.
pub const OPENROUTER: &str = "openrouter";

/// Top-level configuration for augur.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// OpenRouter API configuration (always available as endpoint "openrouter")
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Additional endpoints: model proxies, research providers, local servers
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointConfig>,

    /// Backoff between attempts on the same endpoint
    #[serde(default)]
    pub retry: RetryConfig,

    /// Forecaster slots, in slot order
    #[serde(default = "default_forecasters")]
    pub forecasters: Vec<ForecasterConfig>,

    /// Research step configuration
    #[serde(default)]
    pub research: ResearchConfig,

    /// Prompt and extraction settings
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// OpenRouter API configuration (primary endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// API key (can also be set via OPENROUTER_API_KEY env var)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_openrouter_api_key_env")]
    pub api_key_env: String,

    /// Base URL for OpenRouter API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempt ceiling per call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_openrouter_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_openrouter_api_key_env(),
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Wire protocol spoken by an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// OpenAI-compatible `/chat/completions`
    #[default]
    OpenAi,
    /// Anthropic `/messages`
    Anthropic,
}

/// How the API key is presented to the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    #[default]
    Bearer,
    /// `Authorization: Token <key>` (model proxies)
    Token,
    /// `x-api-key: <key>` (Anthropic direct)
    XApiKey,
}

/// Configuration for an additional endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub kind: EndpointKind,

    /// Base URL for the API (e.g., "https://api.perplexity.ai")
    pub base_url: String,

    /// API key (optional, can be omitted for local endpoints)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default)]
    pub auth_scheme: AuthScheme,

    /// Custom headers to include in requests
    /// Values can contain ${ENV_VAR} for environment variable expansion
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request timeout in seconds (default: 300)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempt ceiling per call (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Extended-thinking token budget (Anthropic only)
    #[serde(default)]
    pub thinking_budget: Option<u32>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            kind: EndpointKind::default(),
            base_url: String::new(),
            api_key: None,
            api_key_env: None,
            auth_scheme: AuthScheme::default(),
            headers: HashMap::new(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            thinking_budget: None,
        }
    }
}

/// Backoff configuration.
///
/// Delay before attempt `n + 1` is `base_delay_secs * n`, never more than
/// `max_delay_secs` (server `retry-after` hints included).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: f64,
}

fn default_base_delay() -> f64 {
    2.0
}

fn default_max_delay() -> f64 {
    60.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

/// Specification for a model on an endpoint.
///
/// K_i: Model ID format depends on the endpoint.
/// - OpenRouter: "provider/model" (e.g., "openai/o4-mini")
/// - Anthropic: model name (e.g., "claude-sonnet-4-20250514")
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Endpoint name (default: "openrouter")
    /// References [openrouter] or [endpoints.<name>] in config
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model ID
    pub id: String,

    /// Maximum tokens for this model
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature; omitted from the request when unset
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl ModelSpec {
    pub fn openrouter(id: impl Into<String>) -> Self {
        Self {
            endpoint: default_endpoint(),
            id: id.into(),
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }
}

fn default_endpoint() -> String {
    OPENROUTER.to_string()
}

fn default_max_tokens() -> u32 {
    16000
}

/// One forecaster slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecasterConfig {
    /// Human-readable label (default: the model ID)
    #[serde(default)]
    pub label: Option<String>,

    /// Primary model
    pub model: ModelSpec,

    /// Model tried once the primary has exhausted its attempts
    #[serde(default)]
    pub fallback: Option<ModelSpec>,
}

impl ForecasterConfig {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.model.id)
    }
}

fn default_forecasters() -> Vec<ForecasterConfig> {
    [
        "anthropic/claude-haiku-4.5",
        "google/gemini-2.5-flash",
        "openai/gpt-5-chat",
        "openai/o4-mini",
        "x-ai/grok-4-fast",
    ]
    .into_iter()
    .map(|id| ForecasterConfig {
        label: None,
        model: ModelSpec::openrouter(id),
        fallback: None,
    })
    .collect()
}

/// Research step configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Run the research step at all
    #[serde(default)]
    pub enabled: bool,

    /// Model used to produce the research summary
    #[serde(default)]
    pub model: Option<ModelSpec>,

    /// Override of the research prompt; `{question}` is replaced by the title
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Which structurally valid match in a response counts as the answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Last occurrence (models reason before answering)
    #[default]
    Last,
    /// First occurrence
    First,
}

/// Prompt and extraction settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Path to a system prompt sent ahead of every forecaster prompt
    #[serde(default)]
    pub system_prompt: Option<PathBuf>,

    #[serde(default)]
    pub extraction: MatchPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openrouter: OpenRouterConfig::default(),
            endpoints: HashMap::new(),
            retry: RetryConfig::default(),
            forecasters: default_forecasters(),
            research: ResearchConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve API key from config or environment for OpenRouter.
    ///
    /// B_i(api key available) → Result
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = &self.openrouter.api_key {
            return Ok(expand_env_vars(key));
        }

        std::env::var(&self.openrouter.api_key_env).map_err(|_| ConfigError::MissingApiKey {
            endpoint: OPENROUTER.to_string(),
            env_var: self.openrouter.api_key_env.clone(),
        })
    }

    /// Resolve API key for a specific endpoint.
    ///
    /// B_i(api key available) → Result
    pub fn resolve_endpoint_api_key(
        &self,
        endpoint_name: &str,
    ) -> Result<Option<String>, ConfigError> {
        if endpoint_name == OPENROUTER {
            return Ok(Some(self.resolve_api_key()?));
        }

        let endpoint = self
            .endpoints
            .get(endpoint_name)
            .ok_or_else(|| ConfigError::EndpointNotFound(endpoint_name.to_string()))?;

        if let Some(key) = &endpoint.api_key {
            return Ok(Some(expand_env_vars(key)));
        }

        if let Some(env_var) = &endpoint.api_key_env {
            return std::env::var(env_var)
                .map(Some)
                .map_err(|_| ConfigError::MissingApiKey {
                    endpoint: endpoint_name.to_string(),
                    env_var: env_var.clone(),
                });
        }

        // No API key configured (valid for local endpoints)
        Ok(None)
    }

    /// Get all unique endpoint names referenced by models.
    pub fn referenced_endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .forecasters
            .iter()
            .flat_map(|f| std::iter::once(&f.model).chain(f.fallback.as_ref()))
            .chain(self.research_model())
            .map(|m| m.endpoint.clone())
            .collect();
        endpoints.sort();
        endpoints.dedup();
        endpoints
    }

    /// Research model, if the research step is enabled.
    pub fn research_model(&self) -> Option<&ModelSpec> {
        if self.research.enabled {
            self.research.model.as_ref()
        } else {
            None
        }
    }

    /// Check structural constraints that TOML parsing cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forecasters.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[forecasters]] entry is required".to_string(),
            ));
        }

        if self.research.enabled && self.research.model.is_none() {
            return Err(ConfigError::Invalid(
                "research is enabled but [research.model] is not set".to_string(),
            ));
        }

        for (key, secs) in [
            ("base_delay_secs", self.retry.base_delay_secs),
            ("max_delay_secs", self.retry.max_delay_secs),
        ] {
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::Invalid(format!(
                    "retry.{key} must be a non-negative number of seconds, got {secs}"
                )));
            }
        }

        if self.openrouter.max_retries == 0
            || self.endpoints.values().any(|e| e.max_retries == 0)
        {
            return Err(ConfigError::Invalid(
                "max_retries must be at least 1".to_string(),
            ));
        }

        for endpoint in self.referenced_endpoints() {
            if endpoint != OPENROUTER && !self.endpoints.contains_key(&endpoint) {
                return Err(ConfigError::EndpointNotFound(endpoint));
            }
        }

        Ok(())
    }

    /// Read the configured system prompt, if any.
    pub fn load_system_prompt(&self) -> Result<Option<String>, ConfigError> {
        self.generation
            .system_prompt
            .as_ref()
            .map(|path| {
                std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
                    path: path.clone(),
                    source: e,
                })
            })
            .transpose()
    }
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error, inconsistent settings
/// - I^B materialized: Missing credentials
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(
        "Missing API key for endpoint '{endpoint}': set {env_var} env var or api_key in config"
    )]
    MissingApiKey { endpoint: String, env_var: String },

    #[error("Endpoint not found: '{0}' (referenced by model but not configured in [endpoints.*])")]
    EndpointNotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
