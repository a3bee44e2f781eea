//! augur - Ensemble forecasting over multiple language models.
//!
//! ## Architecture
//!
//! - **Forecaster Pool**: N slots, each a primary model endpoint plus an
//!   optional fallback, queried concurrently with per-endpoint retry
//! - **Research**: one summary per question, shared by every forecaster
//! - **Extraction**: probabilities read from free text, validated, normalized
//! - **Aggregation**: mean across slots, with a full per-slot transcript
//!
//! ## Pipeline
//!
//! Question → Research → Prompt → Pool (fan-out) → Extract → Aggregate → ForecastResult
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network/API uncertainties (retry, fallback)

pub mod client;
pub mod models;
pub mod pipeline;
pub mod pool;

// Re-exports for convenience
pub use client::{AnthropicClient, EndpointRegistry, LLMClient};
pub use models::{AugurError, Config, ForecastResult, ForecastValue, Question, Result};
pub use pipeline::{Aggregator, ProbabilityExtractor, PromptBuilder, ResearchGatherer};
pub use pool::{ForecasterPool, ForecasterSlot, ModelEndpoint, TransportFailure};
