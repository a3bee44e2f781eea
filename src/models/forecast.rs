//! Forecast result types.
//!
//! K_i: These types represent the data flowing out of one forecast run:
//! per-slot raw responses, the audit transcript, and the aggregated value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Both endpoints of a slot gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFailed {
    /// Last error from the primary endpoint
    pub primary: String,
    /// Last error from the fallback endpoint, if one was configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// One dispatched call, as seen by the aggregator.
///
/// K_i: Exactly one per forecaster slot per dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub slot_id: u32,
    pub label: String,
    /// Model output; empty when `error` is set
    pub text: String,
    /// Label of the endpoint that produced `text`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RequestFailed>,
}

impl fmt::Display for RequestFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        if let Some(fallback) = &self.fallback {
            write!(f, "; fallback: {fallback}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RequestFailed {}

impl RawResponse {
    pub fn success(slot_id: u32, label: &str, served_by: &str, text: String) -> Self {
        Self {
            slot_id,
            label: label.to_string(),
            text,
            served_by: Some(served_by.to_string()),
            error: None,
        }
    }

    pub fn failed(slot_id: u32, label: &str, error: RequestFailed) -> Self {
        Self {
            slot_id,
            label: label.to_string(),
            text: String::new(),
            served_by: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Extracted estimate of a single slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Estimate {
    /// Percentage in [1, 99]
    Binary(f64),
    /// Probabilities aligned with the question options, summing to 1
    MultipleChoice(Vec<f64>),
}

/// What became of one slot's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotOutcome {
    /// Estimate extracted and used
    Extracted { text: String, estimate: Estimate },
    /// Text received but no estimate could be read from it
    ExtractionFailed {
        text: String,
        reason: String,
        /// Value substituted in its place, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        substituted: Option<Estimate>,
    },
    /// No text received at all
    RequestFailed {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        substituted: Option<Estimate>,
    },
}

impl SlotOutcome {
    /// Whether this slot contributed its own estimate.
    pub fn is_extracted(&self) -> bool {
        matches!(self, Self::Extracted { .. })
    }
}

/// Transcript entry for one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub slot_id: u32,
    pub label: String,
    #[serde(flatten)]
    pub outcome: SlotOutcome,
}

/// Ordered audit record of every slot in a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of slots whose own estimate was used.
    pub fn extracted_count(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_extracted()).count()
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "=== Forecaster {} ({}) ===", entry.slot_id, entry.label)?;
            match &entry.outcome {
                SlotOutcome::Extracted { text, .. } => writeln!(f, "{text}")?,
                SlotOutcome::ExtractionFailed {
                    text,
                    reason,
                    substituted,
                } => {
                    writeln!(f, "{text}")?;
                    write!(f, "[extraction failed: {reason}")?;
                    match substituted {
                        Some(value) => writeln!(f, "; using {value}]")?,
                        None => writeln!(f, "; excluded]")?,
                    }
                }
                SlotOutcome::RequestFailed {
                    reason,
                    substituted,
                } => {
                    write!(f, "[request failed: {reason}")?;
                    match substituted {
                        Some(value) => writeln!(f, "; using {value}]")?,
                        None => writeln!(f, "; excluded]")?,
                    }
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary(percent) => write!(f, "{percent:.1}%"),
            Self::MultipleChoice(probs) => {
                let parts: Vec<String> = probs.iter().map(|p| format!("{p:.3}")).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Aggregated forecast value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForecastValue {
    /// Mean percentage across all slots
    Binary { percent: f64 },
    /// Mean probability per option, in option order
    MultipleChoice { probabilities: Vec<(String, f64)> },
}

impl fmt::Display for ForecastValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary { percent } => write!(f, "Binary forecast (mean): {percent:.2}%"),
            Self::MultipleChoice { probabilities } => {
                let parts: Vec<String> = probabilities
                    .iter()
                    .map(|(option, p)| format!("{option}: {p:.3}"))
                    .collect();
                write!(f, "MCQ forecast (mean): {{{}}}", parts.join(", "))
            }
        }
    }
}

/// Result of one aggregator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResult {
    pub run_id: Uuid,
    pub question_title: String,
    pub value: ForecastValue,
    pub transcript: Transcript,
    /// Research context the forecasters were given
    pub research_summary: String,
    pub created_at: DateTime<Utc>,
}

impl ForecastResult {
    /// Human-readable report: one block per slot, then the value line.
    pub fn render(&self) -> String {
        format!("{}{}\n", self.transcript, self.value)
    }
}

/// Statistics for a batch of forecast runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_questions: usize,
    pub forecasted: usize,
    /// Questions the pipeline refused (invalid or unsupported); no model was called
    pub rejected: usize,
    /// Questions whose run failed after calling the models
    pub failed: usize,
    /// Slots whose estimate was used, summed over all runs
    pub slots_extracted: usize,
    /// Slots in all runs
    pub slots_total: usize,
    pub runtime_secs: f64,
    pub extraction_rate: f64,
}

impl BatchStats {
    /// Record a successful run.
    pub fn record(&mut self, result: &ForecastResult) {
        self.forecasted += 1;
        self.slots_extracted += result.transcript.extracted_count();
        self.slots_total += result.transcript.len();
    }

    /// Compute derived fields.
    pub fn finalize(&mut self) {
        self.extraction_rate = if self.slots_total > 0 {
            self.slots_extracted as f64 / self.slots_total as f64
        } else {
            0.0
        };
    }
}
