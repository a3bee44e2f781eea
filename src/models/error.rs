//! Error types for augur.
//!
//! Epistemic taxonomy:
//! - B_i falsified: Expected failures (bad question, no usable estimates)
//! - I^B materialized: Infrastructure failures (network, research backend)
//! - K_i violated: Internal invariant violations (bugs)
//!
//! Per-slot failures (transport, extraction) have their own types in
//! `pool::endpoint` and `pipeline::extract` and never surface here: the
//! aggregator absorbs them into the transcript.

use thiserror::Error;

/// Top-level error type for augur.
#[derive(Debug, Error)]
pub enum AugurError {
    // ═══════════════════════════════════════════════════════════════════
    // B_i FALSIFIED — Belief proven wrong (expected failures)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("Unsupported question type: {0}")]
    UnsupportedQuestion(String),

    #[error("No valid estimates: all {slots} forecasters failed to produce a usable forecast")]
    NoValidEstimates { slots: usize },

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // I^B MATERIALIZED — Bounded ignorance became known-bad
    // ═══════════════════════════════════════════════════════════════════
    #[error("Research failed: {0}")]
    Research(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // K_i VIOLATED — Invariant broken (bug, should not happen)
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AugurError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the caller handed us something unusable, as opposed to the
    /// run failing along the way.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidQuestion(_) | Self::UnsupportedQuestion(_)
        )
    }
}

/// Result type alias for augur.
pub type Result<T> = std::result::Result<T, AugurError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_valid_estimates_message() {
        let err = AugurError::NoValidEstimates { slots: 5 };
        assert_eq!(
            err.to_string(),
            "No valid estimates: all 5 forecasters failed to produce a usable forecast"
        );
        assert!(!err.is_caller_error());
    }

    #[test]
    fn test_caller_errors() {
        assert!(AugurError::UnsupportedQuestion("numeric".into()).is_caller_error());
        assert!(AugurError::InvalidQuestion("empty title".into()).is_caller_error());
        assert!(!AugurError::Research("timeout".into()).is_caller_error());
    }
}
