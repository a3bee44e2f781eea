//! LLM endpoint clients (OpenAI-compatible and Anthropic) and their registry.

mod anthropic;
mod llm_client;
mod model;
mod registry;

pub use anthropic::*;
pub use llm_client::*;
pub use model::*;
pub use registry::*;
