mod output;
mod source;

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use relevance_core::{DocumentSource, RunResult, Topic, TopicSet, TracingProgress};
use relevance_runtime::{BackendConfig, BackendRegistry, CancellationSignal, Pipeline, RunConfig};
use tracing_subscriber::EnvFilter;

use output::{write_summary, OutputFormat};
use source::DirectorySource;

#[derive(Parser, Debug)]
#[command(author, version, about = "Score text documents for topic relevance with an LLM judge")]
struct Args {
    /// Directory of *.txt documents to score
    input: PathBuf,

    /// YAML run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend type (cloud, local)
    #[arg(short, long)]
    backend: Option<String>,

    /// Model identifier passed to the backend
    #[arg(short, long)]
    model: Option<String>,

    /// JSON Lines output file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Topic label to score, e.g. "Oscars Slap"; repeat to select several
    #[arg(long = "topic", value_parser = parse_topic)]
    topics: Vec<Topic>,

    /// Documents scored in parallel
    #[arg(long)]
    concurrency: Option<usize>,

    /// Minimum spacing between backend calls, e.g. "30s"
    #[arg(long, value_parser = humantime::parse_duration)]
    inter_call_delay: Option<Duration>,

    /// Attempts per document, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Characters of each document sent to the backend
    #[arg(long)]
    truncate_chars: Option<usize>,

    /// Retry responses that fail validation with a stricter prompt
    #[arg(long)]
    retry_invalid: bool,

    /// Abort the run after this many authentication failures
    #[arg(long)]
    abort_after_auth_failures: Option<u32>,

    /// Skip input files that are not valid UTF-8
    #[arg(long)]
    skip_undecodable: bool,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    print_config: bool,

    /// Summary format
    #[arg(short, long, value_enum, default_value = "plain")]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_topic(label: &str) -> Result<Topic, String> {
    Topic::from_label(label).ok_or_else(|| {
        let known: Vec<&str> = Topic::ALL.iter().map(|t| t.label()).collect();
        format!("unknown topic '{}' (expected one of: {})", label, known.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = load_config(&args)?;
    if args.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let documents = DirectorySource::new(&args.input)
        .skip_undecodable(args.skip_undecodable)
        .list_documents()
        .with_context(|| format!("Failed to read documents from {}", args.input.display()))?;

    let registry = BackendRegistry::with_defaults();
    let pipeline = Pipeline::from_config(&config, &registry)?;
    if !pipeline.backend().health_check().await {
        tracing::warn!(backend = pipeline.backend().name(), "Backend health check failed, continuing");
    }

    let cancel = CancellationSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight documents");
            on_interrupt.cancel();
        }
    });

    let report = pipeline
        .run(documents, Arc::new(TracingProgress), cancel)
        .await?;

    let destination = config.output.as_deref();
    persist(&report.result, destination)?;

    let destination_label = destination.map(|p| p.display().to_string());
    let stderr = io::stderr();
    write_summary(
        stderr.lock(),
        &report,
        destination_label.as_deref(),
        args.format,
    )?;

    if report.aborted {
        bail!("run aborted after repeated authentication failures");
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(args: &Args) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RunConfig::default(),
    };

    if let Some(name) = &args.backend {
        if name != config.backend.backend_type() {
            config.backend = BackendConfig::for_type(name).with_context(|| {
                format!("Unknown backend '{}' (expected cloud or local)", name)
            })?;
        }
    }
    if let Some(model) = &args.model {
        config.invocation.model = Some(model.clone());
    }
    if let Some(output) = &args.output {
        config.output = Some(output.clone());
    }
    if !args.topics.is_empty() {
        config.topics = TopicSet::new(args.topics.clone())?;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(delay) = args.inter_call_delay {
        config.retry.inter_call_delay = delay;
    }
    if let Some(attempts) = args.max_attempts {
        config.retry.max_attempts = attempts;
    }
    if let Some(chars) = args.truncate_chars {
        config.truncate_chars = chars;
    }
    if args.retry_invalid {
        config.retry.retry_on_invalid_response = true;
    }
    if let Some(threshold) = args.abort_after_auth_failures {
        config.abort_after_auth_failures = Some(threshold);
    }

    config.validate()?;
    Ok(config)
}

/// Write one JSON line per document to `path`, or stdout.
fn persist(result: &RunResult, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            result
                .write_jsonl(&mut writer)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            writer.flush()?;
            tracing::info!(path = %path.display(), records = result.len(), "Wrote results");
        }
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            result.write_jsonl(&mut lock)?;
            lock.flush()?;
        }
    }
    Ok(())
}
