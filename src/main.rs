mod batch;
mod cli;
mod confidence;
mod config;
mod dispatcher;
mod error;
mod input;
mod limiter;
mod openai;
mod pricing;
mod report;
mod schema;
mod ui;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

use batch::{ResultLog, ResultSet};
use cli::{Cli, Command, RunArgs};
use config::AppConfig;
use dispatcher::Dispatcher;
use input::ColumnSelection;
use limiter::AdaptiveLimiter;
use openai::{ClassifyOptions, OpenAiClassifier};
use report::RunSummary;
use schema::SchemaSpec;
use ui::RunProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run(args) => run_batch(args).await,
        Command::Status {
            results,
            schema,
            rows,
        } => show_status(&results, schema.as_deref(), rows),
        Command::Estimate {
            prompt,
            csv,
            text_col,
            model,
            output_tokens,
        } => estimate(&prompt, &csv, text_col, model, output_tokens),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "batch_classify=debug"
    } else {
        "batch_classify=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run_batch(args: RunArgs) -> Result<()> {
    let run_id = Uuid::new_v4();
    let config = AppConfig::load().context("Failed to load configuration")?;
    let api_key = config.resolve_api_key(args.key.as_deref())?;

    if let Some(rpm) = args.rpm
        && !(rpm.is_finite() && rpm > 0.0)
    {
        bail!("--rpm must be positive, got {rpm}");
    }

    let system_prompt = read_text(&args.prompt)?;
    let schema_text = read_text(&args.schema)?;
    let response_format = schema::parse_response_format(&schema_text)?;
    let schema_spec = SchemaSpec::from_response_format(&response_format);

    let columns = ColumnSelection {
        id: args.id_col.clone(),
        text: args.text_col.clone(),
    };
    let mut items = input::load_items(&args.csv, &columns)
        .with_context(|| format!("Failed to load {}", args.csv.display()))?;
    if let Some(limit) = args.limit {
        items.truncate(limit);
    }

    let prior = match &args.resume {
        Some(path) if path.exists() => ResultSet::load_jsonl(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        Some(path) => {
            warn!(path = %path.display(), "Resume file not found; starting fresh");
            ResultSet::new()
        }
        None => ResultSet::new(),
    };

    let out = args
        .out
        .clone()
        .or_else(|| args.resume.clone())
        .unwrap_or_else(default_output_path);

    let model = args.model.clone().unwrap_or_else(|| config.model.clone());
    let rpm = config.resolve_rpm(&model, args.rpm);
    let options = ClassifyOptions {
        model: model.clone(),
        temperature: args.temperature.unwrap_or(config.temperature),
        seed: args.seed.or(config.seed),
        top_logprobs: args.top_logprobs.or(config.top_logprobs),
        system_prompt,
        response_format,
    };

    let client = config.client(api_key).context("Failed to build HTTP client")?;
    let classifier = Arc::new(OpenAiClassifier::new(client, options));
    let mut dispatcher =
        Dispatcher::new(classifier, AdaptiveLimiter::new(rpm)).with_schema(schema_spec.clone());

    let stop = dispatcher.stop_handle();
    let interrupt = tokio::spawn({
        let stop = stop.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            warn!("Interrupted; waiting for in-flight requests (Ctrl-C again to quit now)");
            stop.stop();

            if tokio::signal::ctrl_c().await.is_ok() {
                // Every stored result is already flushed to the journal.
                warn!("Interrupted again; exiting with results saved so far");
                std::process::exit(130);
            }
        }
    });

    let pending = items.iter().filter(|item| !prior.is_succeeded(&item.id)).count();
    info!(%run_id, model = %model, rpm, pending, out = %out.display(), "Run configured");

    let continues = args.resume.as_deref().is_some_and(|path| path == out.as_path());
    let mut log = ResultLog::open(&out, &prior, continues)
        .with_context(|| format!("Failed to open {}", out.display()))?;

    let mut progress = RunProgress::start(pending as u64);
    let results = dispatcher
        .run_observed(&items, prior, |p| {
            progress.update(p);
            if let Err(e) = log.append(p.result) {
                warn!(id = %p.result.id, error = %e, "Failed to append result");
            }
        })
        .await;
    interrupt.abort();
    progress.finish(stop.is_stopped());
    drop(log);

    // Compact the journal down to one line per id.
    results
        .write_jsonl(&out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!(%run_id, records = results.len(), path = %out.display(), "Results written");

    let summary = RunSummary::from_results(&results, &schema_spec);
    ui::print_summary(&summary, false);
    if summary.errors > 0 {
        ui::print_resume_hint(summary.errors, &out);
    }
    Ok(())
}

fn show_status(path: &Path, schema_file: Option<&Path>, rows: bool) -> Result<()> {
    let results =
        ResultSet::load_jsonl(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let schema_spec = match schema_file {
        Some(schema_path) => {
            let response_format = schema::parse_response_format(&read_text(schema_path)?)?;
            SchemaSpec::from_response_format(&response_format)
        }
        None => SchemaSpec::default(),
    };

    let summary = RunSummary::from_results(&results, &schema_spec);
    ui::print_summary(&summary, rows);
    Ok(())
}

fn estimate(
    prompt: &Path,
    csv: &Path,
    text_col: Option<String>,
    model: Option<String>,
    output_tokens: Option<u64>,
) -> Result<()> {
    let config = AppConfig::load().context("Failed to load configuration")?;
    let system_prompt = read_text(prompt)?;
    let columns = ColumnSelection {
        id: None,
        text: text_col,
    };
    let items = input::load_items(csv, &columns)
        .with_context(|| format!("Failed to load {}", csv.display()))?;

    let model = model.unwrap_or_else(|| config.model.clone());
    let output_tokens = output_tokens.unwrap_or(pricing::DEFAULT_OUTPUT_TOKENS);
    let cost = pricing::estimate_cost(&model, &system_prompt, &items, output_tokens);
    let rpm = config.resolve_rpm(&model, None);

    ui::print_estimate(&model, items.len(), cost.as_ref(), rpm);
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn default_output_path() -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(format!("classification_results_{stamp}.jsonl"))
}
