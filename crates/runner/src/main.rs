//! privprobe
//!
//! Runs the privacy testing pipeline over a directory of apps, or reports what
//! has been tested so far.

use clap::{Args, Parser, Subcommand};
use privprobe_common::{Error, FsFailureStore, SqliteLedger};
use privprobe_runner::{
    candidates, AndroidDevice, CaptureProxy, CommandRunner, HostCommandRunner, Orchestrator,
    OutputFormat, RunnerConfig, StatusReport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit code after an interrupt (128 + SIGINT)
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "privprobe")]
#[command(about = "Unattended dynamic privacy testing of Android apps")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "privprobe.toml", global = true)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test every app in the apps directory
    Run(RunArgs),

    /// Show tested apps and the skip-list
    Status {
        /// Output format
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory containing `<app id>.apk` files
    #[arg(long, env = "PRIVPROBE_APPS_DIR")]
    apps_dir: Option<PathBuf>,

    /// Emulator AVD to run
    #[arg(long, env = "PRIVPROBE_AVD_NAME")]
    avd_name: Option<String>,

    /// Snapshot restored before each app
    #[arg(long, env = "PRIVPROBE_AVD_SNAPSHOT_NAME")]
    avd_snapshot_name: Option<String>,

    #[arg(long)]
    mitmdump_path: Option<String>,

    #[arg(long)]
    frida_ps_path: Option<String>,

    #[arg(long)]
    objection_path: Option<String>,
}

impl RunArgs {
    fn apply(self, config: &mut RunnerConfig) {
        if let Some(dir) = self.apps_dir {
            config.apps_dir = dir;
        }
        if let Some(name) = self.avd_name {
            config.android.avd_name = name;
        }
        if let Some(name) = self.avd_snapshot_name {
            config.android.avd_snapshot_name = name;
        }
        if let Some(path) = self.mitmdump_path {
            config.capture.mitmdump_path = path;
        }
        if let Some(path) = self.frida_ps_path {
            config.android.frida_ps_path = path;
        }
        if let Some(path) = self.objection_path {
            config.android.objection_path = path;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    let mut config = RunnerConfig::load(&cli.config)?;

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            run(config).await
        }
        Commands::Status { format } => {
            let failures = FsFailureStore::new(config.failures_dir());
            let report = StatusReport::load(&config.ledger_path(), &failures)?;
            println!("{}", report.render(format));
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: RunnerConfig) -> anyhow::Result<ExitCode> {
    config.validate()?;
    info!("privprobe v{}", privprobe_common::VERSION);

    let candidates = candidates::discover(&config.apps_dir)?;
    let ledger = Arc::new(SqliteLedger::open(config.ledger_path())?);
    let failures = Box::new(FsFailureStore::new(config.failures_dir()));

    let runner: Arc<dyn CommandRunner> = Arc::new(HostCommandRunner::default());
    let device = AndroidDevice::new(
        config.android.clone(),
        config.timing.poll_policy(),
        config.fixtures.clipboard.clone(),
        runner.clone(),
    );
    let capture = CaptureProxy::new(config.capture.clone(), runner);

    let token = CancellationToken::new();
    tokio::spawn(watch_signals(token.clone()));

    let mut orchestrator = Orchestrator::new(config, Box::new(device), ledger, failures, capture)
        .with_cancellation(token);

    match orchestrator.run(candidates).await {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(Error::Interrupted) => Ok(ExitCode::from(EXIT_INTERRUPTED)),
        Err(e) => {
            error!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn watch_signals(token: CancellationToken) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
    }
    token.cancel();
}
