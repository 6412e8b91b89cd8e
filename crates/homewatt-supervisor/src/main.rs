//! Homewatt Supervisor
//!
//! Launches the periodic energy-calculation worker and the HTTP API server,
//! relays termination signals to both, and exits with the status of
//! whichever child terminates first.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use homewatt_core::Config;
use homewatt_core::config::load_config;
use homewatt_supervisor::preflight;
use homewatt_supervisor::process::{ChildSpec, Supervisor, SupervisorSpec, TermSignal};

#[derive(Parser, Debug)]
#[command(name = "homewatt-supervisor")]
#[command(version, about = "Homewatt supervisor - energy worker and API server launcher")]
struct Args {
    /// Worker poll interval in minutes
    #[arg(long, env = "HOMEWATT_INTERVAL_MINUTES")]
    interval: Option<u64>,

    /// Seconds to wait between starting the worker and the server
    #[arg(long, env = "HOMEWATT_STARTUP_DELAY")]
    startup_delay: Option<u64>,

    /// Database file path
    #[arg(long, env = "HOMEWATT_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Worker command (program and arguments; scheduler flags are appended)
    #[arg(long, env = "HOMEWATT_WORKER_COMMAND", num_args = 1.., value_delimiter = ' ')]
    worker_command: Option<Vec<String>>,

    /// Server command (program and arguments)
    #[arg(long, env = "HOMEWATT_SERVER_COMMAND", num_args = 1.., value_delimiter = ' ')]
    server_command: Option<Vec<String>>,

    /// Pre-flight patch command, run after provisioning
    #[arg(long, env = "HOMEWATT_PATCH_COMMAND", num_args = 1.., value_delimiter = ' ')]
    patch_command: Option<Vec<String>>,

    /// Skip database file provisioning
    #[arg(long, env = "HOMEWATT_SKIP_PROVISION")]
    skip_provision: bool,

    /// Seconds to wait for graceful survivor shutdown before SIGKILL
    #[arg(long, env = "HOMEWATT_TERMINATE_TIMEOUT")]
    terminate_timeout: Option<u64>,

    /// Log level filter for the supervisor (e.g. "info", "debug", "warn")
    #[arg(long, env = "HOMEWATT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation)
    #[arg(long, env = "HOMEWATT_LOG_JSON")]
    log_json: bool,
}

/// CLI arguments are the highest-priority config layer.
fn apply_cli_overrides(config: &mut Config, args: Args) {
    if let Some(interval) = args.interval {
        config.worker.interval_minutes = interval;
    }
    if let Some(delay) = args.startup_delay {
        config.supervisor.startup_delay_secs = delay;
    }
    if let Some(path) = args.db_path {
        config.database.path = path;
    }
    if let Some(command) = args.worker_command {
        config.worker.command = command;
    }
    if let Some(command) = args.server_command {
        config.server.command = command;
    }
    if let Some(command) = args.patch_command {
        config.preflight.patch_command = Some(command);
    }
    if args.skip_provision {
        config.preflight.skip_provision = true;
    }
    if let Some(timeout) = args.terminate_timeout {
        config.supervisor.terminate_timeout_secs = timeout;
    }
    if let Some(level) = args.log_level {
        config.supervisor.log_level = level;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_json = args.log_json;

    let project_dir = std::env::current_dir().ok();
    let mut config = load_config(project_dir.as_deref())?;
    apply_cli_overrides(&mut config, args);

    let level = &config.supervisor.log_level;
    let log_filter = format!("homewatt_supervisor={level},homewatt_core={level}");
    homewatt_core::tracing_init::init_tracing(&log_filter, log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        interval_minutes = config.worker.interval_minutes,
        db_path = %config.database.path.display(),
        "Starting homewatt-supervisor"
    );

    preflight::run(&config).await?;

    let spec = SupervisorSpec {
        worker: ChildSpec::worker(&config.worker.command, config.worker.interval_minutes)?,
        server: ChildSpec::server(&config.server.command)?,
        startup_delay: Duration::from_secs(config.supervisor.startup_delay_secs),
        terminate_timeout: Duration::from_secs(config.supervisor.terminate_timeout_secs),
    };
    let supervisor = Supervisor::start(spec).await?;

    let (signal_tx, signal_rx) = mpsc::channel(4);

    // Forward OS termination signals into the supervisor's channel. Each
    // received signal becomes exactly one relay to the children.
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if result.is_err() || signal_tx.send(TermSignal::Interrupt).await.is_err() {
                            break;
                        }
                    }
                    received = sigterm.recv() => {
                        if received.is_none()
                            || signal_tx.send(TermSignal::Terminate).await.is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if signal_tx.send(TermSignal::Interrupt).await.is_err() {
                    break;
                }
            }
        });
    }

    // Notify systemd that both children are running (unix only). The `true`
    // parameter unsets $NOTIFY_SOCKET afterwards; the children never see it
    // at all (spawn removes it from their environment).
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    let report = supervisor.run(signal_rx).await?;
    info!(
        role = %report.role,
        code = report.exit_code(),
        "Supervisor exiting with first child's status"
    );
    std::process::exit(report.exit_code());
}
