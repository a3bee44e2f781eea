//! Research context for forecasters.
//!
//! Epistemic foundation:
//! - K_i: Research runs once per question, before any forecaster call
//! - B_i: The research backend may fail → Result (caller decides)
//! - I^R: Which backend (if any) is a deployment choice

use crate::models::{AugurError, Result};
use crate::pool::{ModelEndpoint, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Default research prompt; `{question}` is replaced by the question title.
pub const DEFAULT_RESEARCH_PROMPT: &str = "\
You are an assistant to a superforecaster.
The superforecaster will give you a question they intend to forecast on.
To be a great assistant, you generate a concise but detailed rundown of the most relevant news, including if the question would resolve Yes or No based on current information.
You do not produce forecasts yourself.

Question:
{question}
";

/// Produces a research summary for a question.
#[async_trait]
pub trait ResearchGatherer: Send + Sync {
    async fn research(&self, question_title: &str) -> Result<String>;
}

/// No research: forecasters see an empty summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResearch;

#[async_trait]
impl ResearchGatherer for NoResearch {
    async fn research(&self, _question_title: &str) -> Result<String> {
        Ok(String::new())
    }
}

/// Fixed research text, e.g. supplied on the command line.
#[derive(Debug, Clone)]
pub struct StaticResearch {
    text: String,
}

impl StaticResearch {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl ResearchGatherer for StaticResearch {
    async fn research(&self, _question_title: &str) -> Result<String> {
        Ok(self.text.clone())
    }
}

/// Research produced by a language model (e.g. a search-augmented one).
pub struct LlmResearcher {
    endpoint: Arc<dyn ModelEndpoint>,
    prompt_template: String,
    retry: RetryPolicy,
}

impl LlmResearcher {
    pub fn new(endpoint: Arc<dyn ModelEndpoint>) -> Self {
        Self {
            endpoint,
            prompt_template: DEFAULT_RESEARCH_PROMPT.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    /// Override the prompt; `{question}` marks where the title goes.
    pub fn with_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build_prompt(&self, question_title: &str) -> String {
        self.prompt_template.replace("{question}", question_title)
    }
}

#[async_trait]
impl ResearchGatherer for LlmResearcher {
    async fn research(&self, question_title: &str) -> Result<String> {
        let prompt = self.build_prompt(question_title);

        let text = self
            .retry
            .invoke(self.endpoint.as_ref(), &prompt)
            .await
            .map_err(|failure| {
                AugurError::Research(format!("{}: {failure}", self.endpoint.label()))
            })?;

        info!(
            endpoint = %self.endpoint.label(),
            chars = text.len(),
            "Research gathered"
        );
        debug!(research = %text, "Research summary");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::TransportFailure;
    use std::sync::Mutex;

    struct Recording {
        prompts: Mutex<Vec<String>>,
        results: Mutex<Vec<std::result::Result<String, TransportFailure>>>,
    }

    impl Recording {
        fn new(results: Vec<std::result::Result<String, TransportFailure>>) -> Self {
            Self {
                prompts: Mutex::new(Vec::new()),
                results: Mutex::new(results),
            }
        }
    }

    #[async_trait]
    impl ModelEndpoint for Recording {
        async fn invoke(&self, prompt: &str) -> std::result::Result<String, TransportFailure> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.results.lock().unwrap().remove(0)
        }

        fn max_attempts(&self) -> u32 {
            2
        }

        fn label(&self) -> &str {
            "research"
        }
    }

    #[tokio::test]
    async fn test_static_and_no_research() {
        assert_eq!(NoResearch.research("Q").await.unwrap(), "");
        assert_eq!(
            StaticResearch::new("notes").research("Q").await.unwrap(),
            "notes"
        );
    }

    #[tokio::test]
    async fn test_llm_researcher_substitutes_title() {
        let endpoint = Arc::new(Recording::new(vec![Ok("summary".to_string())]));
        let researcher = LlmResearcher::new(endpoint.clone());

        assert_eq!(researcher.research("Will X happen?").await.unwrap(), "summary");
        let prompts = endpoint.prompts.lock().unwrap();
        assert!(prompts[0].starts_with("You are an assistant to a superforecaster."));
        assert!(prompts[0].contains("Question:\nWill X happen?"));
    }

    #[tokio::test]
    async fn test_llm_researcher_retries_then_fails() {
        let endpoint = Arc::new(Recording::new(vec![
            Err(TransportFailure::Connection("reset".into())),
            Err(TransportFailure::Connection("reset".into())),
        ]));
        let researcher = LlmResearcher::new(endpoint.clone())
            .with_prompt("Find news on: {question}")
            .with_retry(RetryPolicy::immediate());

        let err = researcher.research("Q").await.unwrap_err();
        assert!(matches!(err, AugurError::Research(msg) if msg.starts_with("research: connection error")));
        assert_eq!(endpoint.prompts.lock().unwrap().len(), 2);
        assert_eq!(endpoint.prompts.lock().unwrap()[0], "Find news on: Q");
    }
}
