#![forbid(unsafe_code)]

//! `macgo-relaunch`: relaunch a program inside its application package.
//!
//! Loads configuration, chooses a launch strategy, runs the relaunch with
//! the background cleanup sweep alongside it, and exits with the child's
//! status.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use macgo_relaunch::cleanup::CleanupManager;
use macgo_relaunch::markers::EnvMarkers;
use macgo_relaunch::models::launch::LaunchDescriptor;
use macgo_relaunch::orchestrator::{
    exit_process, LaunchStrategy, Orchestrator, FAILURE_EXIT_CODE,
};
use macgo_relaunch::policy::{select_strategy, Capability};
use macgo_relaunch::{AppError, RelaunchConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "macgo-relaunch", about = "Relaunch a program inside its application package", version, long_about = None)]
struct Cli {
    /// Application package directory to launch.
    #[arg(long)]
    package: PathBuf,

    /// Executable the package wraps.
    #[arg(long)]
    executable: PathBuf,

    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Execute the packaged binary directly.
    #[arg(long, conflicts_with = "indirect")]
    direct: bool,

    /// Launch through the registered-application launcher.
    #[arg(long)]
    indirect: bool,

    /// Capabilities the program needs; drive the default strategy.
    #[arg(long = "capability", value_enum)]
    capabilities: Vec<Capability>,

    /// Arguments passed through to the relaunched program.
    #[arg(last = true)]
    args: Vec<OsString>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let markers = EnvMarkers::from_env();
    init_tracing(args.log_format, markers.debug)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;

    let outcome = runtime.block_on(run(args, markers));
    // A stdin read parked on a blocking thread would hold a normal shutdown open.
    runtime.shutdown_background();

    match outcome {
        Ok(Some(code)) => exit_process(code),
        Ok(None) => Ok(()),
        Err(err) => {
            error!(%err, "relaunch failed");
            exit_process(FAILURE_EXIT_CODE)
        }
    }
}

/// Returns the exit code to propagate, or `None` when nothing was
/// relaunched or the relaunch was cancelled.
async fn run(args: Cli, markers: EnvMarkers) -> Result<Option<i32>> {
    let mut config = match &args.config {
        Some(path) => RelaunchConfig::load_from_path(path)?,
        None => RelaunchConfig::default(),
    };
    config.apply_markers(&markers);

    let strategy = if markers.no_relaunch {
        None
    } else if args.direct {
        Some(LaunchStrategy::Direct)
    } else if args.indirect {
        Some(LaunchStrategy::Indirect)
    } else {
        select_strategy(&markers, &args.capabilities)
    };
    let Some(strategy) = strategy else {
        info!("relaunch suppressed; nothing to do");
        return Ok(None);
    };

    let descriptor = LaunchDescriptor::new(args.package, args.executable, args.args);

    let ct = CancellationToken::new();
    let cleanup = CleanupManager::new(config.effective_cleanup_roots(), config.sweep_interval());
    let sweeper = cleanup.spawn(ct.child_token());

    let report = Orchestrator::new(config, cleanup)
        .relaunch(&descriptor, &strategy, ct.child_token())
        .await;

    ct.cancel();
    sweeper.shutdown().await;

    let report = report?;
    info!(
        fallback = report.fallback_used,
        delivered = report.signals.delivered,
        "relaunch finished"
    );
    Ok(report.exit_code())
}

fn init_tracing(log_format: LogFormat, debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
