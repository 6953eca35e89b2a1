//! Codecast participant CLI
//!
//! A line-oriented front end for a shared code room. Plain lines are
//! appended to the shared buffer; lines starting with `:` are commands.
//!
//! # Usage
//!
//! ```bash
//! # Create a room id to share
//! codecast room
//!
//! # Join it
//! codecast join --room 6f1c... --name alice
//!
//! # Point at another relay / compile service
//! CODECAST_SERVER=ws://relay:5000 CODECAST_COMPILER=http://runner:8000 codecast join ...
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use codecast_client::{
    ClientCommand, ClientConfig, HttpCompiler, NotificationLevel, OutputPane, RelayClient,
    SessionController, SessionUpdate,
};
use codecast_core::{Roster, RoomId};

const HELP: &str = "\
Commands:
  :run <language>   compile and run the buffer
  :input <text>     set program stdin for :run
  :who              list room members
  :show             print the shared buffer
  :clear            clear the output pane
  :quit             leave the room
Any other line is appended to the buffer.";

/// Codecast - shared code rooms
#[derive(Parser, Debug)]
#[command(name = "codecast", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a new room id
    Room,
    /// Join a room
    Join {
        /// Room id to join
        #[arg(short, long)]
        room: String,

        /// Name shown to other members
        #[arg(short, long)]
        name: String,

        /// Relay URL (overrides CODECAST_SERVER)
        #[arg(long)]
        server: Option<String>,

        /// Compile service URL (overrides CODECAST_COMPILER)
        #[arg(long)]
        compiler: Option<String>,
    },
}

/// What the terminal knows about the room.
#[derive(Default)]
struct View {
    buffer: String,
    roster: Roster,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Room => {
            println!("{}", RoomId::generate());
            Ok(())
        }
        Command::Join {
            room,
            name,
            server,
            compiler,
        } => {
            let mut config = ClientConfig::from_env();
            config.apply_overrides(server, compiler);
            run_join(config, room, name)
        }
    }
}

#[tokio::main]
async fn run_join(config: ClientConfig, room: String, name: String) -> Result<()> {
    // Logs go to stderr so they stay out of the buffer view
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("codecast_client=info".parse()?))
        .init();

    let compiler = HttpCompiler::new(&config).context("Failed to set up compile client")?;

    let (update_tx, mut update_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let cancel_token = CancellationToken::new();

    let mut client = RelayClient::new(
        config,
        SessionController::new(),
        update_tx,
        command_rx,
        cancel_token.clone(),
    );
    let session = tokio::spawn(async move { client.run(&room, &name).await });

    let view = Arc::new(Mutex::new(View::default()));

    // Render updates as they arrive; stops when the session ends
    let render_view = Arc::clone(&view);
    let session_over = CancellationToken::new();
    let render_done = session_over.clone();
    let renderer = tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            match update {
                SessionUpdate::Buffer(code) => {
                    render_view.lock().await.buffer = code;
                    debug!("Buffer replaced by remote change");
                }
                SessionUpdate::Roster(roster) => render_view.lock().await.roster = roster,
                SessionUpdate::Notice(n) => {
                    let tag = match n.level {
                        NotificationLevel::Info => "info",
                        NotificationLevel::Error => "error",
                    };
                    println!("[{} {tag}] {}", n.at.format("%H:%M:%S"), n.message);
                }
                SessionUpdate::Redirect | SessionUpdate::Closed => {
                    render_done.cancel();
                }
            }
        }
        render_done.cancel();
    });

    println!("{HELP}");

    let mut pane = OutputPane::new();
    let mut stdin_text = String::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = session_over.cancelled() => break,
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };

        let Some(line) = line else {
            // EOF behaves like :quit
            let _ = command_tx.send(ClientCommand::Leave);
            break;
        };

        match line.split_once(' ').map_or((line.as_str(), ""), |(c, rest)| (c, rest)) {
            (":quit", _) => {
                let _ = command_tx.send(ClientCommand::Leave);
                break;
            }
            (":help", _) => println!("{HELP}"),
            (":who", _) => {
                let view = view.lock().await;
                for p in view.roster.iter() {
                    println!("  {} ({})", p.display_name, p.connection_id);
                }
            }
            (":show", _) => print!("{}", view.lock().await.buffer),
            (":clear", _) => pane.clear(),
            (":input", text) => stdin_text = text.to_string(),
            (":run", language) => {
                let language = language.trim();
                if language.is_empty() {
                    println!("usage: :run <language>");
                    continue;
                }
                let code = view.lock().await.buffer.clone();
                pane.run(&compiler, &code, language, &stdin_text).await;
                println!("{}", pane.output);
            }
            _ => {
                let code = {
                    let mut view = view.lock().await;
                    view.buffer.push_str(&line);
                    view.buffer.push('\n');
                    view.buffer.clone()
                };
                if command_tx.send(ClientCommand::Edit(code)).is_err() {
                    break;
                }
            }
        }
    }

    let result = session.await.context("Session task failed")?;
    cancel_token.cancel();
    let _ = renderer.await;

    if let Err(e) = result {
        warn!(error = %e, "Session ended");
        std::process::exit(1);
    }
    Ok(())
}
