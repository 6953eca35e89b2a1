//! Codecast relay daemon
//!
//! Accepts participant WebSocket connections, tracks room membership, and
//! relays joins, leaves and buffer changes between members of a room.
//!
//! # Usage
//!
//! ```bash
//! # Start the relay (foreground)
//! codecastd start
//!
//! # Start the relay (background/daemonized)
//! codecastd start -d
//!
//! # Stop / inspect a background relay
//! codecastd stop
//! codecastd status
//!
//! # Bind elsewhere
//! CODECAST_BIND=0.0.0.0:5000 codecastd start
//!
//! # Enable debug logging
//! RUST_LOG=codecastd=debug codecastd start
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use codecastd::{spawn_registry, RelayConfig, RelayServer};

/// Codecast relay daemon
#[derive(Parser, Debug)]
#[command(name = "codecastd", version, about)]
struct Args {
    /// Config file (default: <config dir>/codecast/codecastd.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

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
    },
    /// Stop the running relay
    Stop,
    /// Show relay status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("codecast")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("codecastd.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("codecastd.log")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Returns the PID of a live relay, clearing a stale PID file.
fn running_pid() -> Option<u32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

fn stop_relay(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let pid = i32::try_from(pid).context("PID out of range")?;
        let result = unsafe { libc::kill(pid, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {pid}");
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Start { daemon: false });

    match command {
        Command::Start { daemon } => {
            if let Some(pid) = running_pid() {
                eprintln!("Relay is already running (PID {pid})");
                eprintln!("Use 'codecastd stop' to stop it first.");
                process::exit(1);
            }

            // Config errors should reach the terminal, not the log file
            let config = RelayConfig::load(args.config.as_deref()).context("Failed to load config")?;

            if daemon {
                // Must happen before the tokio runtime starts
                daemonize()?;
            }

            write_pid()?;
            let result = run_relay(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            let Some(pid) = running_pid() else {
                println!("Relay is not running.");
                return Ok(());
            };

            println!("Stopping relay (PID {pid})...");
            stop_relay(pid)?;

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Relay stopped.");
                    return Ok(());
                }
                std::thread::sleep(std::time::Duration::from_millis(100));
            }

            eprintln!("Relay did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Status => {
            let Some(pid) = running_pid() else {
                println!("Relay is not running.");
                process::exit(1);
            };

            println!("Relay is running (PID {pid})");
            if let Ok(config) = RelayConfig::load(args.config.as_deref()) {
                println!("Listening on: ws://{}", config.bind_addr);
            }
            Ok(())
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = open_log(&log_path).context("Failed to open log file for stdout")?;
    let stderr = open_log(&log_path).context("Failed to open log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

fn open_log(path: &Path) -> std::io::Result<File> {
    fs::OpenOptions::new().create(true).append(true).open(path)
}

#[tokio::main]
async fn run_relay(config: RelayConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("codecastd=info".parse()?)
                .add_directive("codecast_core=info".parse()?)
                .add_directive("codecast_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        bind_addr = %config.bind_addr,
        max_members_per_room = config.max_members_per_room,
        "Codecast relay starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(config.max_members_per_room);
    info!("Room registry started");

    let server = RelayServer::bind(&config, registry, cancel_token)
        .await
        .context("Failed to start relay")?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Codecast relay stopped");
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
