//! `relayd` command line.
//!
//! # Usage
//!
//! ```bash
//! # Start the relay (foreground)
//! relayd start
//!
//! # Start the relay (background/daemonized)
//! relayd start -d
//!
//! # Start with a config file and a port override
//! relayd start --config relay.toml --tcp-port 6000
//!
//! # Stop the relay
//! relayd stop
//!
//! # Check relay status
//! relayd status
//!
//! # Enable debug logging
//! RUST_LOG=relayd=debug relayd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: graceful shutdown (every session is told the server is
//!   going away before its socket is closed)

use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::RelayConfig;
use crate::server::RelayServer;
use crate::state::{process_alive, request_stop, StateDir};

/// Relay daemon - dual-protocol chat relay
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the relay
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        #[command(flatten)]
        overrides: StartOptions,
    },
    /// Stop the running relay
    Stop,
    /// Show relay status
    Status,
}

#[derive(ClapArgs, Debug, Default)]
struct StartOptions {
    /// TOML config file (defaults to $RELAY_CONFIG, then built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host for both protocols
    #[arg(long)]
    host: Option<String>,

    /// TCP listen port
    #[arg(long)]
    tcp_port: Option<u16>,

    /// UDP listen port
    #[arg(long)]
    udp_port: Option<u16>,
}

impl StartOptions {
    /// Loads the config file and applies the command-line overrides.
    fn resolve(&self) -> Result<RelayConfig> {
        let mut config = RelayConfig::load_or_default(self.config.as_deref())
            .context("Failed to load configuration")?;

        if let Some(host) = &self.host {
            config.tcp.host = host.clone();
            config.udp.host = host.clone();
        }
        if let Some(port) = self.tcp_port {
            config.tcp.port = port;
        }
        if let Some(port) = self.udp_port {
            config.udp.port = port;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Entry point for the `relayd` binary.
pub fn run() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        overrides: StartOptions::default(),
    });

    let state = StateDir::locate();
    let pid_file = state.pid_file();

    match command {
        Command::Start { daemon, overrides } => {
            if let Some(pid) = pid_file.live_pid() {
                eprintln!("Relay is already running (PID {pid})");
                eprintln!("Use 'relayd stop' to stop it first.");
                process::exit(1);
            }

            // Fail on a bad config before forking.
            let config = overrides.resolve()?;

            if daemon {
                daemonize(&state)?;
            }

            pid_file.claim()?;
            let result = run_daemon(config);
            pid_file.release();
            result
        }
        Command::Stop => {
            let Some(pid) = pid_file.live_pid() else {
                println!("Relay is not running.");
                return Ok(());
            };

            println!("Stopping relay (PID {pid})...");
            request_stop(pid)?;

            for _ in 0..50 {
                if !process_alive(pid) {
                    println!("Relay stopped.");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(100));
            }

            eprintln!("Relay did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => match pid_file.live_pid() {
            Some(pid) => {
                println!("Relay is running (PID {pid})");
                println!("PID file: {}", pid_file.path().display());
                Ok(())
            }
            None => {
                println!("Relay is not running.");
                process::exit(1);
            }
        },
    }
}

/// Forks into the background, sending output to the state dir's log.
fn daemonize(state: &StateDir) -> Result<()> {
    use daemonize::Daemonize;

    state.ensure()?;
    let log_path = state.daemon_log();
    let stdout = File::create(&log_path)
        .with_context(|| format!("Failed to create {}", log_path.display()))?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: RelayConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relayd=info".parse()?)
                .add_directive("relay_core=info".parse()?)
                .add_directive("relay_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Relay daemon starting"
    );

    let cancel = CancellationToken::new();
    let running = RelayServer::new(config, cancel.clone())
        .start()
        .await
        .context("Failed to start relay server")?;

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }
    info!("Shutdown signal received");

    running.shutdown().await;
    info!("Relay daemon stopped");
    Ok(())
}

/// Waits for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
