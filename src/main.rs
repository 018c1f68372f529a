use restfloor::config::Config;
use restfloor::daemon::{self, DaemonPaths};
use restfloor::protocol::{self, Request, Response};
use restfloor::{orchestrator, server};

use anyhow::{Context as _, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "restfloor", version, about = "Predict where an idle elevator should wait")]
struct Cli {
    /// Path to config.toml (defaults to <instance dir>/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the service
    Start {
        /// Stay attached to the terminal instead of daemonizing
        #[arg(long)]
        foreground: bool,
    },
    /// Stop a running instance
    Stop,
    /// Report whether an instance is running
    Status,
    /// Record that the elevator was called to a floor
    Demand {
        floor: i64,
        /// ISO-8601 timestamp, defaults to now
        #[arg(value_parser = parse_timestamp_arg)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Ask for the best floor to rest at
    Predict {
        /// ISO-8601 timestamp, defaults to now
        #[arg(value_parser = parse_timestamp_arg)]
        timestamp: Option<DateTime<Utc>>,
    },
}

fn parse_timestamp_arg(input: &str) -> Result<DateTime<Utc>, String> {
    protocol::parse_timestamp(input).map_err(|error| error.to_string())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let paths = DaemonPaths::new(&config);

    match cli.command {
        Command::Start { foreground } => start(config, &paths, foreground, cli.debug),
        Command::Stop => stop(&paths),
        Command::Status => {
            match daemon::is_running(&paths) {
                Some(pid) => println!("restfloor is running (pid {pid})"),
                None => println!("restfloor is not running"),
            }
            Ok(())
        }
        Command::Demand { floor, timestamp } => {
            let request = Request::Demand {
                floor,
                timestamp: timestamp.unwrap_or_else(Utc::now),
            };
            match request_once(&paths, &request)? {
                Response::Ack => println!("demand recorded: floor {floor}"),
                other => bail!("unexpected reply to demand: {other}"),
            }
            Ok(())
        }
        Command::Predict { timestamp } => {
            let request = Request::Predict {
                timestamp: timestamp.unwrap_or_else(Utc::now),
            };
            match request_once(&paths, &request)? {
                Response::Floor(floor) => println!("predicted best resting floor: {floor}"),
                Response::NoPrediction => println!("no prediction available"),
                Response::Ack => bail!("unexpected reply to prediction query: ack"),
            }
            Ok(())
        }
    }
}

fn start(config: Config, paths: &DaemonPaths, foreground: bool, debug: bool) -> anyhow::Result<()> {
    if let Some(pid) = daemon::is_running(paths) {
        bail!("restfloor is already running (pid {pid})");
    }

    std::fs::create_dir_all(&config.instance_dir).with_context(|| {
        format!(
            "failed to create instance directory: {}",
            config.instance_dir.display()
        )
    })?;

    // The guard must outlive the runtime so buffered log lines are flushed.
    let _log_guard = if foreground {
        daemon::init_foreground_tracing(debug);
        daemon::write_pid_file(&paths.pid_file)?;
        None
    } else {
        daemon::daemonize(paths)?;
        Some(daemon::init_background_tracing(paths, debug))
    };

    tracing::info!(
        instance_dir = %config.instance_dir.display(),
        pid = std::process::id(),
        "starting restfloor"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = runtime.block_on(orchestrator::run(config, orchestrator::shutdown_signal()));

    daemon::cleanup(paths);
    if let Err(error) = &result {
        tracing::error!(%error, "restfloor exited with error");
    }
    result
}

fn stop(paths: &DaemonPaths) -> anyhow::Result<()> {
    let Some(pid) = daemon::is_running(paths) else {
        println!("restfloor is not running");
        return Ok(());
    };

    daemon::terminate(pid)?;
    if daemon::wait_for_exit(pid) {
        println!("restfloor stopped");
        Ok(())
    } else {
        bail!("restfloor (pid {pid}) did not exit within 10 seconds")
    }
}

fn request_once(paths: &DaemonPaths, request: &Request) -> anyhow::Result<Response> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime
        .block_on(server::send_request(&paths.socket, request))?
        .context("restfloor closed the connection without replying")
}
