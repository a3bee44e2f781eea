//! augur CLI - Ensemble forecasting over multiple language models.

use anyhow::{Context, Result, bail};
use augur::client::HealthStatus;
use augur::models::Config;
use augur::pipeline::{StaticResearch, load_questions, run_batch};
use augur::{Aggregator, EndpointRegistry, PromptBuilder, Question};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "augur")]
#[command(author = "Infernet <dev@infernet.org>")]
#[command(version)]
#[command(about = "Ensemble forecasting over multiple language models")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "augur.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Forecast a single question
    Forecast {
        /// Path to the question file (TOML or JSON)
        #[arg(short, long)]
        question: PathBuf,

        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit the full result as JSON instead of the text report
        #[arg(long)]
        json: bool,

        /// Use this file as the research summary instead of the research model
        #[arg(long)]
        research_file: Option<PathBuf>,

        /// Date to state in the prompt (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Forecast every question in a JSONL file
    Batch {
        /// Path to input questions JSONL file
        #[arg(short, long)]
        questions: PathBuf,

        /// Path to output JSONL file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Also ping every configured endpoint
        #[arg(long)]
        check_endpoints: bool,
    },

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# augur configuration file

[openrouter]
# API key (can also use OPENROUTER_API_KEY env var)
# api_key = "sk-..."
base_url = "https://openrouter.ai/api/v1"
timeout_secs = 300
max_retries = 3

# Anthropic models through a proxy that expects "Authorization: Token ..."
[endpoints.metaculus]
kind = "anthropic"
base_url = "https://llm-proxy.metaculus.com/proxy/anthropic/v1"
api_key_env = "METACULUS_TOKEN"
auth_scheme = "token"
max_retries = 7
thinking_budget = 12000

[endpoints.perplexity]
base_url = "https://api.perplexity.ai"
api_key_env = "PERPLEXITY_API_KEY"

[retry]
base_delay_secs = 2.0
# Cap on any single wait, server retry-after hints included
max_delay_secs = 60.0

[[forecasters]]
label = "claude"
model = { endpoint = "metaculus", id = "claude-sonnet-4-20250514" }
fallback = { id = "anthropic/claude-sonnet-4" }

[[forecasters]]
model = { id = "google/gemini-2.5-flash" }

[[forecasters]]
model = { id = "openai/gpt-5-chat" }

[[forecasters]]
model = { id = "openai/o4-mini" }

[[forecasters]]
model = { id = "x-ai/grok-4-fast" }

[research]
enabled = true
model = { endpoint = "perplexity", id = "sonar-pro" }

[generation]
# system_prompt = "prompts/system.md"
extraction = "last"  # or "first"
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn build_aggregator(config: &Config) -> Result<Aggregator> {
    let registry = EndpointRegistry::from_config(config).context("Failed to build endpoints")?;
    registry
        .validate_model_endpoints(config)
        .context("Invalid model endpoints")?;
    Ok(Aggregator::from_config(config, &registry)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate { check_endpoints } => {
            let config = load_config(&cli.config)?;
            let registry =
                EndpointRegistry::from_config(&config).context("Failed to resolve API keys")?;
            registry
                .validate_model_endpoints(&config)
                .context("Invalid model endpoints")?;

            info!("Configuration is valid");
            info!("  Endpoints: {}", registry.endpoint_names().join(", "));
            for (i, forecaster) in config.forecasters.iter().enumerate() {
                info!(
                    "  Forecaster {}: {} ({}:{}{})",
                    i + 1,
                    forecaster.label(),
                    forecaster.model.endpoint,
                    forecaster.model.id,
                    if forecaster.fallback.is_some() {
                        ", with fallback"
                    } else {
                        ""
                    }
                );
            }
            match config.research_model() {
                Some(model) => info!("  Research: {}:{}", model.endpoint, model.id),
                None => info!("  Research: disabled"),
            }

            if check_endpoints {
                let results = registry.health_check_all().await;
                let unhealthy: Vec<&str> = results
                    .iter()
                    .filter(|r| r.status != HealthStatus::Healthy)
                    .map(|r| r.endpoint.as_str())
                    .collect();
                if !unhealthy.is_empty() {
                    bail!("Unhealthy endpoints: {}", unhealthy.join(", "));
                }
            }
            return Ok(());
        }

        Commands::Forecast {
            question,
            output,
            json,
            research_file,
            date,
        } => {
            let config = load_config(&cli.config)?;
            let question = Question::from_file(&question)
                .with_context(|| format!("Failed to load question from {question:?}"))?;

            let mut aggregator = build_aggregator(&config)?;
            if let Some(path) = research_file {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read research from {path:?}"))?;
                aggregator = aggregator.with_research(Arc::new(StaticResearch::new(text)));
            }
            if let Some(date) = date {
                aggregator = aggregator.with_prompt_builder(PromptBuilder::with_date(date));
            }

            let result = aggregator.run(&question).await?;
            let report = if json {
                serde_json::to_string_pretty(&result)?
            } else {
                result.render()
            };

            match output {
                Some(path) => {
                    std::fs::write(&path, report)
                        .with_context(|| format!("Failed to write report to {path:?}"))?;
                    info!(path = ?path, "Report written");
                }
                None => print!("{report}"),
            }
        }

        Commands::Batch { questions, output } => {
            let config = load_config(&cli.config)?;
            let aggregator = build_aggregator(&config)?;
            let questions = load_questions(&questions)?;

            let stats = run_batch(&aggregator, &questions, &output).await?;

            println!("\n=== Batch Forecast Complete ===");
            println!("Questions:   {}", stats.total_questions);
            println!("Forecasted:  {}", stats.forecasted);
            println!("Rejected:    {}", stats.rejected);
            println!("Failed:      {}", stats.failed);
            println!("Extraction:  {:.1}%", stats.extraction_rate * 100.0);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            println!("Output:      {output:?}");
        }
    }

    Ok(())
}
