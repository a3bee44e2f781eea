//! Forecast aggregation: research → prompt → fan-out → extract → mean.
//!
//! Epistemic foundation:
//! - K_i: Every slot appears in the transcript, whatever happened to it
//! - K_i: Binary failures count as 50%; multiple-choice failures are excluded
//! - B_i: Research may fail → degraded to an empty summary
//! - B_i: All multiple-choice slots may fail → NoValidEstimates
//! - I^B: Model behaviour is unknowable → extraction is per-response Result

use crate::client::EndpointRegistry;
use crate::models::{
    AugurError, Config, Estimate, ForecastResult, ForecastValue, Question, QuestionKind,
    RawResponse, Result, SlotOutcome, Transcript, TranscriptEntry,
};
use crate::pipeline::{
    LlmResearcher, NoResearch, ProbabilityExtractor, PromptBuilder, RegexExtractor,
    ResearchGatherer,
};
use crate::pool::{ForecasterPool, RetryPolicy};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Percentage used for a binary slot that produced no estimate.
pub const BINARY_DEFAULT_PERCENT: f64 = 50.0;

/// Runs the forecasting pipeline for one question at a time.
pub struct Aggregator {
    research: Arc<dyn ResearchGatherer>,
    prompts: PromptBuilder,
    pool: ForecasterPool,
    extractor: Arc<dyn ProbabilityExtractor>,
}

impl Aggregator {
    /// Aggregator with today's date and the default (last-match) extractor.
    pub fn new(pool: ForecasterPool, research: Arc<dyn ResearchGatherer>) -> Self {
        Self {
            research,
            prompts: PromptBuilder::new(),
            pool,
            extractor: Arc::new(RegexExtractor::default()),
        }
    }

    /// Wire an aggregator from configuration.
    ///
    /// B_i(system prompt readable) → Result
    /// B_i(every referenced endpoint configured) → Result
    pub fn from_config(config: &Config, registry: &EndpointRegistry) -> Result<Self> {
        let system_prompt: Option<Arc<str>> = config.load_system_prompt()?.map(Arc::from);
        let pool = registry.build_pool(config, system_prompt)?;

        let research: Arc<dyn ResearchGatherer> = match registry.research_model(config)? {
            Some(endpoint) => {
                let mut researcher =
                    LlmResearcher::new(endpoint).with_retry(RetryPolicy::from(&config.retry));
                if let Some(prompt) = &config.research.prompt {
                    researcher = researcher.with_prompt(prompt.clone());
                }
                Arc::new(researcher)
            }
            None => Arc::new(NoResearch),
        };

        Ok(Self::new(pool, research)
            .with_extractor(Arc::new(RegexExtractor::new(config.generation.extraction))))
    }

    pub fn with_research(mut self, research: Arc<dyn ResearchGatherer>) -> Self {
        self.research = research;
        self
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ProbabilityExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn pool(&self) -> &ForecasterPool {
        &self.pool
    }

    /// Forecast one question.
    ///
    /// Only invalid or unsupported questions and a run with no usable
    /// multiple-choice estimate are errors; slot failures are recorded.
    pub async fn run(&self, question: &Question) -> Result<ForecastResult> {
        question.validate()?;
        if let QuestionKind::Numeric { .. } = question.kind {
            return Err(AugurError::UnsupportedQuestion(format!(
                "{} questions cannot be aggregated",
                question.kind
            )));
        }

        let start = Instant::now();
        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            kind = %question.kind,
            title = %question.title,
            slots = self.pool.len(),
            "Forecasting question"
        );

        let research_summary = match self.research.research(&question.title).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Research failed, continuing without it");
                String::new()
            }
        };

        let prompt = self.prompts.build(question, &research_summary)?;
        debug!(run_id = %run_id, chars = prompt.len(), "Prompt built");

        let responses = self.pool.dispatch_all(&prompt).await;

        let (value, transcript) = match &question.kind {
            QuestionKind::MultipleChoice { options } => {
                let (probabilities, transcript) =
                    aggregate_multiple_choice(self.extractor.as_ref(), &responses, options)?;
                let probabilities = options.iter().cloned().zip(probabilities).collect();
                (ForecastValue::MultipleChoice { probabilities }, transcript)
            }
            _ => {
                let (percent, transcript) = aggregate_binary(self.extractor.as_ref(), &responses);
                (ForecastValue::Binary { percent }, transcript)
            }
        };

        info!(
            run_id = %run_id,
            extracted = transcript.extracted_count(),
            slots = transcript.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "{value}"
        );

        Ok(ForecastResult {
            run_id,
            question_title: question.title.clone(),
            value,
            transcript,
            research_summary,
            created_at: Utc::now(),
        })
    }

    /// Forecast a binary question: mean percentage and rendered transcript.
    pub async fn run_binary(&self, question: &Question) -> Result<(f64, String)> {
        expect_kind(question, "binary")?;
        let result = self.run(question).await?;
        match &result.value {
            ForecastValue::Binary { percent } => Ok((*percent, result.render())),
            other => Err(AugurError::Internal(format!(
                "binary run produced {other}"
            ))),
        }
    }

    /// Forecast a multiple-choice question: mean probability per option.
    pub async fn run_multiple_choice(
        &self,
        question: &Question,
    ) -> Result<(Vec<(String, f64)>, String)> {
        expect_kind(question, "multiple_choice")?;
        let result = self.run(question).await?;
        let rendered = result.render();
        match result.value {
            ForecastValue::MultipleChoice { probabilities } => Ok((probabilities, rendered)),
            other => Err(AugurError::Internal(format!(
                "multiple-choice run produced {other}"
            ))),
        }
    }
}

fn expect_kind(question: &Question, kind: &str) -> Result<()> {
    if question.kind.name() == kind {
        Ok(())
    } else {
        Err(AugurError::InvalidQuestion(format!(
            "expected a {kind} question, got {}",
            question.kind
        )))
    }
}

/// Mean over all slots; a slot with no estimate counts as 50%.
pub fn aggregate_binary(
    extractor: &dyn ProbabilityExtractor,
    responses: &[RawResponse],
) -> (f64, Transcript) {
    let mut transcript = Transcript::new();
    let mut values = Vec::with_capacity(responses.len());

    for response in responses {
        let outcome = match &response.error {
            Some(error) => {
                warn!(slot = response.slot_id, error = %error, "No response, using default");
                SlotOutcome::RequestFailed {
                    reason: error.to_string(),
                    substituted: Some(Estimate::Binary(BINARY_DEFAULT_PERCENT)),
                }
            }
            None => match extractor.extract_binary(&response.text) {
                Ok(percent) => SlotOutcome::Extracted {
                    text: response.text.clone(),
                    estimate: Estimate::Binary(percent),
                },
                Err(e) => {
                    warn!(slot = response.slot_id, error = %e, "Extraction failed, using default");
                    SlotOutcome::ExtractionFailed {
                        text: response.text.clone(),
                        reason: e.to_string(),
                        substituted: Some(Estimate::Binary(BINARY_DEFAULT_PERCENT)),
                    }
                }
            },
        };

        values.push(match &outcome {
            SlotOutcome::Extracted {
                estimate: Estimate::Binary(percent),
                ..
            } => *percent,
            _ => BINARY_DEFAULT_PERCENT,
        });
        transcript.push(TranscriptEntry {
            slot_id: response.slot_id,
            label: response.label.clone(),
            outcome,
        });
    }

    let mean = if values.is_empty() {
        BINARY_DEFAULT_PERCENT
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    };
    (mean, transcript)
}

/// Element-wise mean over slots with a valid vector; failed slots are excluded.
///
/// Fails with `NoValidEstimates` if no slot produced a valid vector.
pub fn aggregate_multiple_choice(
    extractor: &dyn ProbabilityExtractor,
    responses: &[RawResponse],
    options: &[String],
) -> Result<(Vec<f64>, Transcript)> {
    let mut transcript = Transcript::new();
    let mut sums = vec![0.0; options.len()];
    let mut valid = 0usize;

    for response in responses {
        let outcome = match &response.error {
            Some(error) => {
                warn!(slot = response.slot_id, error = %error, "No response, excluding slot");
                SlotOutcome::RequestFailed {
                    reason: error.to_string(),
                    substituted: None,
                }
            }
            None => match extractor.extract_multiple_choice(&response.text, options.len()) {
                Ok(probabilities) => {
                    sums.iter_mut()
                        .zip(&probabilities)
                        .for_each(|(sum, p)| *sum += p);
                    valid += 1;
                    SlotOutcome::Extracted {
                        text: response.text.clone(),
                        estimate: Estimate::MultipleChoice(probabilities),
                    }
                }
                Err(e) => {
                    warn!(slot = response.slot_id, error = %e, "Extraction failed, excluding slot");
                    SlotOutcome::ExtractionFailed {
                        text: response.text.clone(),
                        reason: e.to_string(),
                        substituted: None,
                    }
                }
            },
        };

        transcript.push(TranscriptEntry {
            slot_id: response.slot_id,
            label: response.label.clone(),
            outcome,
        });
    }

    if valid == 0 {
        return Err(AugurError::NoValidEstimates {
            slots: responses.len(),
        });
    }

    let means = sums.into_iter().map(|s| s / valid as f64).collect();
    Ok((means, transcript))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestFailed;

    fn ok(slot_id: u32, text: &str) -> RawResponse {
        RawResponse::success(slot_id, &format!("m{slot_id}"), "test", text.to_string())
    }

    fn failed(slot_id: u32) -> RawResponse {
        RawResponse::failed(
            slot_id,
            &format!("m{slot_id}"),
            RequestFailed {
                primary: "HTTP 500: boom".to_string(),
                fallback: None,
            },
        )
    }

    #[test]
    fn test_binary_mean_with_defaults() {
        let responses = vec![
            ok(1, "Probability: 60%"),
            ok(2, "Probability: 70%"),
            ok(3, "Probability: 80%"),
            ok(4, "no idea"),
            failed(5),
        ];
        let (mean, transcript) = aggregate_binary(&RegexExtractor::default(), &responses);

        assert!((mean - 62.0).abs() < 1e-9);
        assert_eq!(transcript.len(), 5);
        assert_eq!(transcript.extracted_count(), 3);
        assert!(matches!(
            transcript.entries()[3].outcome,
            SlotOutcome::ExtractionFailed { .. }
        ));
        assert!(matches!(
            transcript.entries()[4].outcome,
            SlotOutcome::RequestFailed {
                substituted: Some(Estimate::Binary(p)),
                ..
            } if p == 50.0
        ));
    }

    #[test]
    fn test_multiple_choice_excludes_failures() {
        let options: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let responses = vec![
            ok(1, "Probabilities: [20, 30, 50]"),
            ok(2, "Probabilities: [40, 30, 30]"),
            ok(3, "Probabilities: [50, 50]"),
            failed(4),
        ];

        let (means, transcript) =
            aggregate_multiple_choice(&RegexExtractor::default(), &responses, &options).unwrap();

        let expected = [0.3, 0.3, 0.4];
        for (m, e) in means.iter().zip(expected) {
            assert!((m - e).abs() < 1e-9, "{means:?}");
        }
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript.extracted_count(), 2);
    }

    #[test]
    fn test_multiple_choice_none_valid() {
        let options = vec!["A".to_string(), "B".to_string()];
        let responses = vec![ok(1, "I refuse"), failed(2)];

        let err = aggregate_multiple_choice(&RegexExtractor::default(), &responses, &options)
            .unwrap_err();
        assert!(matches!(err, AugurError::NoValidEstimates { slots: 2 }));
    }

    #[test]
    fn test_expect_kind() {
        let question = Question::multiple_choice("Q", ["A", "B"]);
        assert!(expect_kind(&question, "multiple_choice").is_ok());
        assert!(matches!(
            expect_kind(&question, "binary"),
            Err(AugurError::InvalidQuestion(_))
        ));
    }
}
