//! Batch forecasting over a JSONL question file.
//!
//! Pipeline flow:
//! Questions (JSONL) → Aggregator (one question at a time) → ForecastResult (JSONL)

use crate::models::{AugurError, BatchStats, Question, Result};
use crate::pipeline::Aggregator;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

/// Load questions from a JSONL file (one question object per line).
///
/// Blank lines are skipped; every question is validated.
pub fn load_questions(path: &Path) -> Result<Vec<Question>> {
    let file = File::open(path).map_err(|e| AugurError::io("opening questions file", e))?;
    let reader = BufReader::new(file);
    let mut questions = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| AugurError::io("reading questions file", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let question: Question = serde_json::from_str(&line)
            .map_err(|e| AugurError::ParseError(format!("Line {}: {}", line_num + 1, e)))?;
        question.validate().map_err(|e| match e {
            AugurError::InvalidQuestion(reason) => {
                AugurError::InvalidQuestion(format!("Line {}: {reason}", line_num + 1))
            }
            other => other,
        })?;
        questions.push(question);
    }

    info!(count = questions.len(), "Loaded questions");
    Ok(questions)
}

/// Forecast every question in turn and write one JSON result per line.
///
/// A question that is rejected or fails is logged, counted and skipped;
/// I/O errors abort the batch.
pub async fn run_batch(
    aggregator: &Aggregator,
    questions: &[Question],
    output_path: &Path,
) -> Result<BatchStats> {
    let start = Instant::now();
    let total = questions.len();

    info!(
        total_questions = total,
        slots = aggregator.pool().len(),
        "Starting batch"
    );

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
            .map_err(|e| AugurError::Internal(format!("Invalid progress template: {e}")))?
            .progress_chars("##-"),
    );

    let output_file =
        File::create(output_path).map_err(|e| AugurError::io("creating output file", e))?;
    let mut writer = BufWriter::new(output_file);

    let mut stats = BatchStats {
        total_questions: total,
        ..BatchStats::default()
    };

    for question in questions {
        match aggregator.run(question).await {
            Ok(result) => {
                stats.record(&result);

                let json = serde_json::to_string(&result).map_err(|e| {
                    AugurError::Internal(format!("Failed to serialize result: {e}"))
                })?;
                writeln!(writer, "{json}").map_err(|e| AugurError::io("writing output", e))?;
                writer
                    .flush()
                    .map_err(|e| AugurError::io("flushing output", e))?;
            }
            Err(e) if e.is_caller_error() => {
                stats.rejected += 1;
                warn!(title = %question.title, error = %e, "Question rejected, skipping");
            }
            Err(e) => {
                stats.failed += 1;
                warn!(title = %question.title, error = %e, "Question failed, skipping");
            }
        }

        pb.inc(1);
        pb.set_message(format!(
            "forecasted: {}, rejected: {}, failed: {}",
            stats.forecasted, stats.rejected, stats.failed
        ));
    }

    pb.finish_with_message(format!(
        "Done! {} forecasted, {} rejected, {} failed",
        stats.forecasted, stats.rejected, stats.failed
    ));

    stats.runtime_secs = start.elapsed().as_secs_f64();
    stats.finalize();

    info!(
        forecasted = stats.forecasted,
        rejected = stats.rejected,
        failed = stats.failed,
        extraction_rate = format!("{:.1}%", stats.extraction_rate * 100.0),
        runtime_secs = format!("{:.1}", stats.runtime_secs),
        "Batch complete"
    );

    Ok(stats)
}
