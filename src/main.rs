//! worklens: binary entrypoint
//! Loads settings and the configuration script, fetches every configured
//! source once and prints the merged report to stdout.
//!
//! Exit codes: 0 all sources fetched, 1 some sources failed (the rest is
//! still printed), 2 configuration error or cancellation.

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use worklens::config::{self, LogFormat, LoggingSettings, Settings};
use worklens::metrics::Metrics;
use worklens::present::{presenter, OutputFormat};
use worklens::{Engine, FetchContext, ScriptRuntime, ScriptSource};

const SCRIPT_FILE: &str = "worklens.rhai";

#[derive(Debug, Parser)]
#[command(name = "worklens", version, about = "Aggregate and rank work items from your trackers")]
struct Cli {
    /// Configuration script [default: $HOME/.config/worklens.rhai, else ./worklens.rhai]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Markdown)]
    output: OutputFormat,

    /// Settings file (TOML) [default: $WORKLENS_SETTINGS_PATH, else config/worklens.toml]
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Maximum number of sources fetched at once (0 = unlimited)
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Write a Prometheus text snapshot of the run's metrics to this file
    #[arg(long, value_name = "FILE")]
    metrics_out: Option<PathBuf>,
}

/// Logs go to stderr so stdout carries only the report.
fn init_tracing(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn default_script_path() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        let p = PathBuf::from(home).join(".config").join(SCRIPT_FILE);
        if p.exists() {
            return p;
        }
    }
    PathBuf::from(SCRIPT_FILE)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env for tracker credentials; no-op when absent.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match config::load(cli.settings.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("worklens: {e:#}");
            return ExitCode::from(2);
        }
    };
    init_tracing(&settings.logging);

    match run(cli, settings).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("worklens: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli, mut settings: Settings) -> anyhow::Result<ExitCode> {
    if let Some(n) = cli.max_concurrency {
        settings.engine.max_concurrent_fetches = n;
    }
    let metrics = match &cli.metrics_out {
        Some(_) => Some(Metrics::init()?),
        None => None,
    };
    let script_path = cli.config.unwrap_or_else(default_script_path);

    let registry = Arc::new(worklens::builtin_registry(&settings)?);
    let script = ScriptSource::from_path(&script_path)?;
    let runtime = ScriptRuntime::load(Arc::clone(&registry), script, settings.script.limits())
        .await
        .with_context(|| format!("loading {}", script_path.display()))?;
    let engine = Engine::new(registry, runtime.handle(), settings.engine.clone());

    let (ctx, canceller) = FetchContext::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            canceller.cancel();
        }
    });

    let report = engine.run(&ctx).await?;
    info!(
        results = report.results.len(),
        failures = report.failures.len(),
        "report ready"
    );
    let (results, failure) = report.into_parts();
    if let (Some(metrics), Some(path)) = (&metrics, &cli.metrics_out) {
        metrics.write_to(path)?;
    }

    let rendered = presenter(cli.output).render(&results)?;
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(rendered.as_bytes())
        .and_then(|_| stdout.flush())
        .context("writing report")?;

    match failure {
        None => Ok(ExitCode::SUCCESS),
        Some(err) => {
            for line in err.to_string().lines() {
                eprintln!("worklens: {line}");
            }
            Ok(ExitCode::from(1))
        }
    }
}
