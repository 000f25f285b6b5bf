// matchwire command-line client.
//
// Subcommands:
//   list          active matches from the discovery endpoint
//   show <id>     one REST snapshot of a match
//   watch <id>    live socket: status line on change, game log as it grows
//
// Logs go to stderr so stdout stays clean for match output.

mod render;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use matchwire_core::config::{self, TelemetryConfig};
use matchwire_core::connection::ConnectionManager;
use matchwire_core::discovery::MatchDiscovery;
use matchwire_core::snapshot::{SnapshotClient, SnapshotError};

#[derive(Parser, Debug)]
#[command(name = "matchwire")]
#[command(about = "Real-time match telemetry client")]
struct Cli {
    /// Config file (defaults to config/telemetry.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Telemetry server URL, overriding config and environment
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List active matches
    List,
    /// Fetch a single match snapshot
    Show { match_id: String },
    /// Follow a match live until Ctrl+C
    Watch {
        match_id: String,

        /// Stay closed after the first disconnect
        #[arg(long)]
        no_reconnect: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    let mut config =
        config::load_config(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(server) = cli.server.as_deref() {
        config = config.with_server_url(server);
    }
    info!("Using telemetry server {}", config.server_url);

    match cli.command {
        Command::List => list(&config).await,
        Command::Show { match_id } => show(&config, &match_id).await,
        Command::Watch {
            match_id,
            no_reconnect,
        } => {
            if no_reconnect {
                config.auto_reconnect = false;
            }
            watch(&config, match_id).await
        }
    }
}

async fn list(config: &TelemetryConfig) -> anyhow::Result<()> {
    let discovery = MatchDiscovery::from_config(config).context("invalid server URL")?;
    let matches = match discovery.fetch().await {
        Ok(matches) => matches,
        Err(e) if e.is_unreachable() => {
            println!("Server offline ({})", discovery.url());
            return Ok(());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to list matches from {}", discovery.url()))
        }
    };

    if matches.is_empty() {
        println!("No active matches");
    }
    for info in &matches {
        println!("{}", render::match_row(info));
    }
    Ok(())
}

async fn show(config: &TelemetryConfig, match_id: &str) -> anyhow::Result<()> {
    let client = SnapshotClient::from_config(config);
    let snapshot = match client.fetch(match_id).await {
        Ok(snapshot) => snapshot,
        Err(SnapshotError::NotFound { .. }) => {
            println!("Match {match_id} not found");
            return Ok(());
        }
        Err(SnapshotError::ServerUnreachable { .. }) => {
            println!("Server offline");
            return Ok(());
        }
        Err(e) => return Err(e).with_context(|| format!("failed to fetch match {match_id}")),
    };
    println!("{}", render::snapshot_summary(&snapshot));
    Ok(())
}

async fn watch(config: &TelemetryConfig, match_id: String) -> anyhow::Result<()> {
    let mut manager = ConnectionManager::new(config);
    let mut state_rx = manager.subscribe();
    let mut diagnostics = manager.diagnostics();

    manager.start(match_id);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_status = String::new();
    let mut last_seq = 0;
    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = state_rx.borrow_and_update().clone();

                let line = render::status_line(&state);
                if line != last_status {
                    println!("{line}");
                    last_status = line;
                }
                for entry in state.game_log().since(last_seq) {
                    println!("{}", render::game_log_line(entry));
                    last_seq = entry.seq;
                }
            }
            event = diagnostics.recv() => match event {
                Ok(event) => {
                    if let Some(line) = render::diagnostic_line(&event) {
                        println!("{line}");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} diagnostics", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                info!("Interrupted, closing connection");
                break;
            }
        }
    }

    manager.stop();
    Ok(())
}

/// Initialize tracing to stderr, filtered by `RUST_LOG` when set.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("matchwire=info,matchwire_core=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
