//! Probability extraction from free-text forecaster output.
//!
//! Epistemic foundation:
//! - K_i: Prompts ask for "Probability: ZZ%" or "Probabilities: [..]" as the last line
//! - B_i: Models follow the format (often they don't) → Result per response
//! - B_i: Later mentions supersede earlier ones (reasoning precedes the answer)
//! - I^R: First/last match policy is configurable

use crate::models::MatchPolicy;
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static PERCENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]+)%").expect("Invalid percent regex")
});

static PROBABILITIES_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Probabilities:\s*\[((?-u:[0-9.,\s%])+)\]").expect("Invalid probabilities regex")
});

/// Binary estimates are clipped into this range (percent).
pub const BINARY_MIN: f64 = 1.0;
pub const BINARY_MAX: f64 = 99.0;

/// A list summing to more than this (and at most `PERCENT_SUM_MAX`) is read as percentages.
const PERCENT_SUM_MIN: f64 = 1.5;
const PERCENT_SUM_MAX: f64 = 110.0;

/// Accepted distance of the (rescaled) sum from 1.0.
const SUM_TOLERANCE: f64 = 0.02;

/// Why no estimate could be read from a response.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("no probability found in response")]
    NoMatch,

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("expected {expected} probabilities, got {found}")]
    OptionCountMismatch { expected: usize, found: usize },

    #[error("probabilities sum to {sum:.3}, not 1")]
    BadSum { sum: f64 },
}

/// Reads a structured estimate out of one model response.
pub trait ProbabilityExtractor: Send + Sync {
    /// Percentage in [1, 99].
    fn extract_binary(&self, text: &str) -> Result<f64, ExtractionError>;

    /// One probability per option, in option order, summing to 1.
    fn extract_multiple_choice(
        &self,
        text: &str,
        num_options: usize,
    ) -> Result<Vec<f64>, ExtractionError>;
}

/// Regex-backed extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexExtractor {
    policy: MatchPolicy,
}

impl RegexExtractor {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    fn pick<'t>(&self, re: &Regex, text: &'t str) -> Option<&'t str> {
        let mut captures = re
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()));
        match self.policy {
            MatchPolicy::First => captures.next(),
            MatchPolicy::Last => captures.last(),
        }
    }
}

impl ProbabilityExtractor for RegexExtractor {
    fn extract_binary(&self, text: &str) -> Result<f64, ExtractionError> {
        let digits = self
            .pick(&PERCENT_PATTERN, text)
            .ok_or(ExtractionError::NoMatch)?;

        // ASCII digits only, so this parses; very long runs saturate to inf and clamp
        let value: f64 = digits
            .parse()
            .map_err(|_| ExtractionError::InvalidNumber(digits.to_string()))?;

        Ok(value.clamp(BINARY_MIN, BINARY_MAX))
    }

    fn extract_multiple_choice(
        &self,
        text: &str,
        num_options: usize,
    ) -> Result<Vec<f64>, ExtractionError> {
        let list = self
            .pick(&PROBABILITIES_PATTERN, text)
            .ok_or(ExtractionError::NoMatch)?;

        let mut values = list
            .split(',')
            .map(|entry| entry.trim().replace('%', ""))
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .parse::<f64>()
                    .map_err(|_| ExtractionError::InvalidNumber(entry.clone()))
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let mut sum: f64 = values.iter().sum();
        if sum > PERCENT_SUM_MIN && sum <= PERCENT_SUM_MAX {
            values.iter_mut().for_each(|v| *v /= 100.0);
            sum = values.iter().sum();
        }

        if values.len() != num_options {
            return Err(ExtractionError::OptionCountMismatch {
                expected: num_options,
                found: values.len(),
            });
        }

        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(ExtractionError::BadSum { sum });
        }

        Ok(values.into_iter().map(|v| v / sum).collect())
    }
}

/// Binary extraction with the default (last-match) policy.
pub fn extract_binary(text: &str) -> Result<f64, ExtractionError> {
    RegexExtractor::default().extract_binary(text)
}

/// Multiple-choice extraction with the default (last-match) policy.
pub fn extract_multiple_choice(text: &str, num_options: usize) -> Result<Vec<f64>, ExtractionError> {
    RegexExtractor::default().extract_multiple_choice(text, num_options)
}
