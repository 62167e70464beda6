//! tvepg - XMLTV programme guide repair, merge and fetch CLI.

/// Application configuration (TOML).
mod config;
/// Feed loading and multi-source processing.
mod pipeline;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::Serialize;
use tracing::instrument;
use tracing_subscriber::filter::EnvFilter;
#[cfg(not(feature = "otel"))]
use tracing_subscriber::fmt;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;
use tvepg_fetch::EpgFetcher;
use tvepg_xmltv::repair_document;
use tvepg_xmltv::tz::{ConvertMode, convert_utc_programmes, parse_utc_offset};
use tvepg_xmltv::unify::{GeneratorInfo, merge_documents};

use crate::config::{AppConfig, FetchConfig, parse_window_end, resolve_config_path};
use crate::pipeline::{
    DocumentReport, Input, load_document, log_channel_stats, run_sources, write_document,
};

/// User-Agent sent when the config does not set one.
const DEFAULT_USER_AGENT: &str = concat!("tvepg/", env!("CARGO_PKG_VERSION"));

/// CLI argument parser.
#[derive(Parser)]
#[command(name = "tvepg", about, version)]
struct Cli {
    /// Override config directory.
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Repair one XMLTV file or URL.
    Repair(RepairArgs),
    /// Fetch, repair and write every configured source.
    Fetch(FetchArgs),
    /// Merge several XMLTV files or URLs into one document.
    Merge(MergeArgs),
    /// Convert `+0000` programme times to another UTC offset.
    ConvertTz(ConvertTzArgs),
    /// Write a default config file.
    Init(InitArgs),
    /// Print shell completions to stdout.
    Completions(CompletionsArgs),
}

/// Arguments for `repair`.
#[derive(clap::Args)]
struct RepairArgs {
    /// Input path or http(s) URL (plain or gzip).
    input: String,

    /// Output file (gzip-compressed when it ends in `.gz`).
    #[arg(short, long)]
    output: PathBuf,

    /// End of the rollover window, HH:MM:SS (overrides config).
    #[arg(long)]
    rollover_window_end: Option<String>,

    /// Escape bare `&` characters before parsing.
    #[arg(long)]
    escape_ampersands: bool,

    /// Write the repair report and per-channel coverage as JSON to this file.
    #[arg(long)]
    report: Option<PathBuf>,
}

/// Arguments for `fetch`.
#[derive(clap::Args)]
struct FetchArgs {
    /// Process only the source with this name.
    #[arg(long)]
    only: Option<String>,

    /// Write the run summary as JSON to this file.
    #[arg(long)]
    report: Option<PathBuf>,
}

/// Arguments for `merge`.
#[derive(clap::Args)]
struct MergeArgs {
    /// Input paths or http(s) URLs, merged in order.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<String>,

    /// Output file.
    #[arg(short, long)]
    output: PathBuf,

    /// Repair the merged document before writing.
    #[arg(long)]
    repair: bool,

    /// Escape bare `&` characters before parsing.
    #[arg(long)]
    escape_ampersands: bool,
}

/// Arguments for `convert-tz`.
#[derive(clap::Args)]
struct ConvertTzArgs {
    /// Input path or http(s) URL (plain or gzip).
    input: String,

    /// Output file.
    #[arg(short, long)]
    output: PathBuf,

    /// Target offset, e.g. UTC+8 or UTC-5.
    #[arg(long)]
    target: String,

    /// Only relabel the offset, keep the wall-clock time.
    #[arg(long)]
    relabel_only: bool,

    /// Escape bare `&` characters before parsing.
    #[arg(long)]
    escape_ampersands: bool,
}

/// Arguments for `init`.
#[derive(clap::Args)]
struct InitArgs {
    /// Overwrite an existing config file.
    #[arg(long)]
    force: bool,
}

/// Arguments for `completions`.
#[derive(clap::Args)]
struct CompletionsArgs {
    /// Target shell.
    shell: Shell,
}

/// Loads and validates the config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
fn load_config(dir: Option<&PathBuf>) -> Result<(PathBuf, AppConfig)> {
    let path = resolve_config_path(dir).context("failed to resolve config path")?;
    let config = AppConfig::load(&path).context("failed to load config")?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    tracing::debug!(path = %path.display(), sources = config.sources.len(), "Config loaded");
    Ok((path, config))
}

/// Builds an `EpgFetcher` from the `[fetch]` settings.
///
/// # Errors
///
/// Returns an error if the client fails to build.
fn build_fetcher(config: &FetchConfig) -> Result<EpgFetcher> {
    EpgFetcher::builder()
        .user_agent(
            config
                .user_agent
                .clone()
                .unwrap_or_else(|| String::from(DEFAULT_USER_AGENT)),
        )
        .timeout(Duration::from_secs(config.timeout_secs))
        .max_retries(config.max_retries)
        .initial_backoff(Duration::from_secs(config.initial_backoff_secs))
        .max_backoff(Duration::from_secs(config.max_backoff_secs))
        .build()
        .context("failed to build EPG fetcher")
}

/// Writes a JSON report.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
fn write_report(path: &Path, value: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Wrote report");
    Ok(())
}

/// Runs the `repair` subcommand.
///
/// # Errors
///
/// Returns an error if loading, parsing or writing fails, or no programme
/// survives the repair.
#[instrument(skip_all)]
async fn run_repair(args: &RepairArgs, dir: Option<&PathBuf>) -> Result<()> {
    let (_, config) = load_config(dir)?;
    let mut options = config.repair.to_options()?;
    if let Some(ref end) = args.rollover_window_end {
        options.rollover_window_end = parse_window_end(end)?;
    }

    let fetcher = build_fetcher(&config.fetch)?;
    let input = Input::parse(&args.input);
    let mut doc = load_document(&fetcher, &input, args.escape_ampersands).await?;

    let report = repair_document(&mut doc, &options)
        .with_context(|| format!("repair of {input} failed"))?;
    write_document(&doc, &args.output)?;

    let channels = doc.channel_stats();
    log_channel_stats(&input.to_string(), &channels);
    if let Some(ref path) = args.report {
        write_report(path, &DocumentReport { report, channels })?;
    }
    Ok(())
}

/// Runs the `fetch` subcommand.
///
/// # Errors
///
/// Returns an error if the config is invalid, no source matches, or every
/// source failed.
#[instrument(skip_all)]
async fn run_fetch(args: &FetchArgs, dir: Option<&PathBuf>) -> Result<()> {
    let (path, config) = load_config(dir)?;
    let options = config.repair.to_options()?;

    let sources = match args.only {
        Some(ref name) => {
            let selected: Vec<_> = config
                .sources
                .iter()
                .filter(|s| &s.name == name)
                .cloned()
                .collect();
            if selected.is_empty() {
                bail!("no source named {name:?} in {}", path.display());
            }
            selected
        }
        None => config.sources.clone(),
    };
    if sources.is_empty() {
        bail!("no sources configured in {}", path.display());
    }

    let fetcher = build_fetcher(&config.fetch)?;
    let summary = run_sources(&fetcher, &sources, &options, config.fetch.source_delay()).await;

    if let Some(ref report) = args.report {
        write_report(report, &summary)?;
    }
    if summary.all_failed() {
        bail!("all {} sources failed", summary.total);
    }
    Ok(())
}

/// Runs the `merge` subcommand.
///
/// Inputs that fail to load are skipped with a warning.
///
/// # Errors
///
/// Returns an error if no input could be loaded, the optional repair leaves
/// no programme, or writing fails.
#[instrument(skip_all)]
async fn run_merge(args: &MergeArgs, dir: Option<&PathBuf>) -> Result<()> {
    let (_, config) = load_config(dir)?;
    let fetcher = build_fetcher(&config.fetch)?;

    let mut docs = Vec::with_capacity(args.inputs.len());
    for raw in &args.inputs {
        let input = Input::parse(raw);
        match load_document(&fetcher, &input, args.escape_ampersands).await {
            Ok(doc) => docs.push(doc),
            Err(e) => tracing::warn!(%input, error = %format!("{e:#}"), "Skipping input"),
        }
    }
    if docs.is_empty() {
        bail!("none of the {} inputs could be loaded", args.inputs.len());
    }

    let generator = GeneratorInfo {
        name: String::from("tvepg"),
        url: String::from(env!("CARGO_PKG_REPOSITORY")),
    };
    let (mut merged, _) = merge_documents(docs, &generator);

    if args.repair {
        let options = config.repair.to_options()?;
        repair_document(&mut merged, &options).context("repair of merged document failed")?;
    }
    write_document(&merged, &args.output)
}

/// Runs the `convert-tz` subcommand.
///
/// # Errors
///
/// Returns an error if the target is invalid or loading/writing fails.
#[instrument(skip_all)]
async fn run_convert_tz(args: &ConvertTzArgs, dir: Option<&PathBuf>) -> Result<()> {
    let target = parse_utc_offset(&args.target)?;
    let mode = if args.relabel_only {
        ConvertMode::Relabel
    } else {
        ConvertMode::Shift
    };

    let (_, config) = load_config(dir)?;
    let fetcher = build_fetcher(&config.fetch)?;
    let input = Input::parse(&args.input);
    let mut doc = load_document(&fetcher, &input, args.escape_ampersands).await?;

    convert_utc_programmes(&mut doc, target, mode);
    write_document(&doc, &args.output)
}

/// Runs the `init` subcommand.
///
/// # Errors
///
/// Returns an error if the file exists (without `--force`) or cannot be written.
#[instrument(skip_all)]
fn run_init(args: &InitArgs, dir: Option<&PathBuf>) -> Result<()> {
    let path = resolve_config_path(dir).context("failed to resolve config path")?;
    if path.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    AppConfig::default()
        .save(&path)
        .context("failed to save config")?;
    tracing::info!(path = %path.display(), "Wrote default config");
    Ok(())
}

/// Runs the `completions` subcommand.
fn run_completions(args: &CompletionsArgs) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_owned();
    clap_complete::generate(args.shell, &mut cmd, name, &mut std::io::stdout());
}

/// Entry point.
///
/// # Errors
///
/// Returns an error if subcommand execution fails.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    #[cfg(not(feature = "otel"))]
    {
        fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .init();
    }

    #[cfg(feature = "otel")]
    {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

        let otel_layer = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .and_then(|_| {
                let exporter = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .build()
                    .ok()?;

                let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
                    .with_simple_exporter(exporter)
                    .build();

                let tracer = opentelemetry::trace::TracerProvider::tracer(
                    &tracer_provider,
                    env!("CARGO_PKG_NAME"),
                );
                opentelemetry::global::set_tracer_provider(tracer_provider);

                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            });

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .init();
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Repair(args) => run_repair(&args, cli.dir.as_ref()).await,
        Commands::Fetch(args) => run_fetch(&args, cli.dir.as_ref()).await,
        Commands::Merge(args) => run_merge(&args, cli.dir.as_ref()).await,
        Commands::ConvertTz(args) => run_convert_tz(&args, cli.dir.as_ref()).await,
        Commands::Init(args) => run_init(&args, cli.dir.as_ref()),
        Commands::Completions(args) => {
            run_completions(&args);
            Ok(())
        }
    }
}
