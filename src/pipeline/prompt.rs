//! Forecaster prompt rendering.
//!
//! Epistemic foundation:
//! - K_i: Binary and multiple-choice questions have fixed templates
//! - K_i: Missing optional fields render as empty strings
//! - I^R: "Today" is injectable for reproducible prompts

use crate::models::{AugurError, Question, QuestionKind, Result};
use chrono::{Local, NaiveDate};

const BINARY_TEMPLATE: &str = r#"
You are a professional forecaster interviewing for a job.

Your interview question is:
{title}

Question background:
{background}

This question's outcome will be determined by the specific criteria below. These criteria have not yet been satisfied:
{resolution_criteria}

{fine_print}

Your research assistant says:
{summary_report}

Today is {today}.

Before answering you write:
(a) The time left until the outcome to the question is known.
(b) The status quo outcome if nothing changed.
(c) A brief description of a scenario that results in a No outcome.
(d) A brief description of a scenario that results in a Yes outcome.

You write your rationale remembering that good forecasters put extra weight on the status quo outcome since the world changes slowly most of the time. Think deeply about the question and approach it from multiple possible viewpoints.

The last thing you write is your final answer as: "Probability: ZZ%", 0-100
"#;

const MULTIPLE_CHOICE_TEMPLATE: &str = r#"
You are a professional forecaster interviewing for a job.

Your interview question is:
{title}

The options are: {options}

Background:
{background}

{resolution_criteria}

{fine_print}

Your research assistant says:
{summary_report}

Today is {today}.

Before answering you write:
(a) The time left until the outcome to the question is known.
(b) The status quo outcome if nothing changed.
(c) A description of an scenario that results in an unexpected outcome.

You write your rationale remembering that (1) good forecasters put extra weight on the status quo outcome since the world changes slowly most of the time, and (2) good forecasters leave some moderate probability on most options to account for unexpected outcomes.

The last thing you write is your final probabilities for the N options in this order {options}. Format your output **EXACTLY** as below, ensuring that the **probabilities are between 0 and 100, sum to 100, and are not followed by a % sign**:

Probabilities: [Probability_1, Probability_2, ..., Probability_N]
"#;

/// Renders questions into forecaster prompts.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    today: NaiveDate,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    /// Builder dated with today's local date.
    pub fn new() -> Self {
        Self::with_date(Local::now().date_naive())
    }

    pub fn with_date(today: NaiveDate) -> Self {
        Self { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Render the prompt for a question and its research summary.
    pub fn build(&self, question: &Question, research_summary: &str) -> Result<String> {
        let template = match &question.kind {
            QuestionKind::Binary => BINARY_TEMPLATE,
            QuestionKind::MultipleChoice { .. } => MULTIPLE_CHOICE_TEMPLATE,
            QuestionKind::Numeric { .. } => {
                return Err(AugurError::UnsupportedQuestion(format!(
                    "no prompt template for {} questions",
                    question.kind
                )));
            }
        };

        let today = self.today.format("%Y-%m-%d").to_string();
        let options = format_options(question.options());

        // Placeholders are substituted in a single pass so that braces in
        // question text or research are never re-expanded.
        Ok(render(template, |key| match key {
            "title" => Some(question.title.as_str()),
            "background" => Some(question.description.as_str()),
            "resolution_criteria" => Some(question.resolution_criteria.as_str()),
            "fine_print" => Some(question.fine_print.as_str()),
            "summary_report" => Some(research_summary),
            "today" => Some(today.as_str()),
            "options" => Some(options.as_str()),
            _ => None,
        }))
    }
}

/// Options as a bracketed, quoted list: `['A', 'B', 'C']`.
fn format_options(options: &[String]) -> String {
    let quoted: Vec<String> = options.iter().map(|o| format!("'{o}'")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Replace `{key}` placeholders; unknown keys are left as written.
fn render<'a>(template: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(template.len() * 2);
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}').and_then(|end| lookup(&after[..end]).map(|v| (end, v))) {
            Some((end, value)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Scaling;

    fn builder() -> PromptBuilder {
        PromptBuilder::with_date(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap())
    }

    #[test]
    fn test_binary_prompt() {
        let question = Question::binary("Will it rain in Paris on 2025-04-01?")
            .with_description("Weather question.")
            .with_resolution_criteria("Resolves Yes if Météo-France reports rain.");

        let prompt = builder().build(&question, "Forecasts show showers.").unwrap();

        assert!(prompt.contains("Your interview question is:\nWill it rain in Paris on 2025-04-01?"));
        assert!(prompt.contains("Question background:\nWeather question."));
        assert!(prompt.contains("Resolves Yes if Météo-France reports rain."));
        assert!(prompt.contains("Your research assistant says:\nForecasts show showers."));
        assert!(prompt.contains("Today is 2025-03-14."));
        assert!(prompt.contains("(d) A brief description of a scenario that results in a Yes outcome."));
        assert!(prompt.contains("\"Probability: ZZ%\", 0-100"));
        assert!(!prompt.contains("{fine_print}"));
    }

    #[test]
    fn test_multiple_choice_prompt_lists_options() {
        let question = Question::multiple_choice("Who wins?", ["Alice", "Bob", "Carol"]);
        let prompt = builder().build(&question, "").unwrap();

        assert!(prompt.contains("The options are: ['Alice', 'Bob', 'Carol']"));
        assert!(prompt.contains("N options in this order ['Alice', 'Bob', 'Carol']"));
        assert!(prompt.contains("Probabilities: [Probability_1, Probability_2, ..., Probability_N]"));
    }

    #[test]
    fn test_braces_in_input_not_expanded() {
        let question = Question::binary("Will {title} appear?");
        let prompt = builder().build(&question, "research mentions {today}").unwrap();

        assert!(prompt.contains("Will {title} appear?"));
        assert!(prompt.contains("research mentions {today}"));
    }

    #[test]
    fn test_numeric_unsupported() {
        let question = Question::numeric(
            "How many?",
            Scaling {
                min: 0.0,
                max: 100.0,
                zero_point: None,
                open_lower: false,
                open_upper: true,
                unit: None,
            },
        );
        assert!(matches!(
            builder().build(&question, ""),
            Err(AugurError::UnsupportedQuestion(_))
        ));
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let out = render("{a} {b} {", |k| (k == "a").then_some("x"));
        assert_eq!(out, "x {b} {");
    }
}
