//! Forecasting questions.
//!
//! K_i: A question is immutable once constructed; every pipeline stage
//! borrows it read-only.

use crate::models::{AugurError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Value range of a numeric question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaling {
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zero_point: Option<f64>,
    #[serde(default)]
    pub open_lower: bool,
    #[serde(default)]
    pub open_upper: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Question type with its type-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    Binary,
    Numeric { scaling: Scaling },
    MultipleChoice { options: Vec<String> },
}

impl QuestionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Numeric { .. } => "numeric",
            Self::MultipleChoice { .. } => "multiple_choice",
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A forecasting question.
///
/// Optional text fields default to empty strings so templates never render
/// a placeholder for missing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(flatten)]
    pub kind: QuestionKind,

    pub title: String,

    /// Background text
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub resolution_criteria: String,

    #[serde(default)]
    pub fine_print: String,
}

impl Question {
    /// Create a binary (yes/no) question.
    pub fn binary(title: impl Into<String>) -> Self {
        Self::with_kind(QuestionKind::Binary, title)
    }

    /// Create a multiple-choice question over the given options.
    pub fn multiple_choice<S: Into<String>>(
        title: impl Into<String>,
        options: impl IntoIterator<Item = S>,
    ) -> Self {
        let options = options.into_iter().map(Into::into).collect();
        Self::with_kind(QuestionKind::MultipleChoice { options }, title)
    }

    /// Create a numeric question.
    pub fn numeric(title: impl Into<String>, scaling: Scaling) -> Self {
        Self::with_kind(QuestionKind::Numeric { scaling }, title)
    }

    fn with_kind(kind: QuestionKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            description: String::new(),
            resolution_criteria: String::new(),
            fine_print: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_resolution_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.resolution_criteria = criteria.into();
        self
    }

    pub fn with_fine_print(mut self, fine_print: impl Into<String>) -> Self {
        self.fine_print = fine_print.into();
        self
    }

    /// Options of a multiple-choice question, empty for other kinds.
    pub fn options(&self) -> &[String] {
        match &self.kind {
            QuestionKind::MultipleChoice { options } => options,
            _ => &[],
        }
    }

    /// Check structural constraints before a run.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(AugurError::InvalidQuestion("title is empty".to_string()));
        }

        match &self.kind {
            QuestionKind::Binary => Ok(()),
            QuestionKind::MultipleChoice { options } => {
                if options.len() < 2 {
                    return Err(AugurError::InvalidQuestion(format!(
                        "multiple choice needs at least 2 options, got {}",
                        options.len()
                    )));
                }
                if options.iter().any(|o| o.trim().is_empty()) {
                    return Err(AugurError::InvalidQuestion(
                        "multiple choice options must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            QuestionKind::Numeric { scaling } => {
                if scaling.min.is_nan() || scaling.max.is_nan() || scaling.min >= scaling.max {
                    return Err(AugurError::InvalidQuestion(format!(
                        "numeric range is empty: min {} >= max {}",
                        scaling.min, scaling.max
                    )));
                }
                Ok(())
            }
        }
    }

    /// Load a question from a TOML or JSON file (chosen by extension).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AugurError::io(format!("reading question {}", path.display()), e))?;

        let question: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| AugurError::ParseError(format!("{}: {e}", path.display())))?,
            _ => toml::from_str(&content)
                .map_err(|e| AugurError::ParseError(format!("{}: {e}", path.display())))?,
        };

        question.validate()?;
        Ok(question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_multiple_choice_from_toml() {
        let question: Question = toml::from_str(
            r#"
type = "multiple_choice"
title = "Who wins?"
description = "A three-way race."
options = ["Alice", "Bob", "Carol"]
"#,
        )
        .unwrap();

        assert_eq!(question.kind.name(), "multiple_choice");
        assert_eq!(question.options(), ["Alice", "Bob", "Carol"]);
        assert_eq!(question.fine_print, "");
        question.validate().unwrap();
    }

    #[test]
    fn test_binary_from_json() {
        let question: Question =
            serde_json::from_str(r#"{"type": "binary", "title": "Will it rain?"}"#).unwrap();
        assert_eq!(question.kind, QuestionKind::Binary);
        assert!(question.options().is_empty());
    }

    #[test]
    fn test_numeric_scaling_defaults() {
        let question: Question = toml::from_str(
            r#"
type = "numeric"
title = "GDP growth"

[scaling]
min = -5.0
max = 10.0
"#,
        )
        .unwrap();

        match &question.kind {
            QuestionKind::Numeric { scaling } => {
                assert!(!scaling.open_lower);
                assert!(!scaling.open_upper);
                assert_eq!(scaling.zero_point, None);
            }
            other => panic!("unexpected kind {other}"),
        }
        question.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_questions() {
        assert!(Question::binary("  ").validate().is_err());
        assert!(Question::multiple_choice("Pick", ["only"]).validate().is_err());
        assert!(Question::multiple_choice("Pick", ["a", ""]).validate().is_err());

        let scaling = Scaling {
            min: 10.0,
            max: 10.0,
            zero_point: None,
            open_lower: false,
            open_upper: false,
            unit: None,
        };
        assert!(Question::numeric("Flat", scaling).validate().is_err());
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"type": "multiple_choice", "title": "Q", "options": ["x", "y"]}}"#
        )
        .unwrap();

        let question = Question::from_file(&path).unwrap();
        assert_eq!(question.options().len(), 2);

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "type = \"binary\"\ntitle = \"\"\n").unwrap();
        assert!(matches!(
            Question::from_file(&bad),
            Err(AugurError::InvalidQuestion(_))
        ));
    }
}
