use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use retro_live::{
    ClientConfig, Collaborators, ConnectionManager, ConnectionState, ConsoleNotifier,
    HttpSnapshotFetcher, RetrospectiveStore, WsConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "retro_live=info";
const LEAVE_REASON: &str = "The user left the retrospective";

#[derive(Parser)]
#[command(name = "retro-live")]
#[command(
    about = "Follow a collaborative retrospective live over its websocket channel",
    version
)]
#[command(after_help = "Configuration is read from the environment (and a .env file):
   RETRO_API_HOST, RETRO_SECURE, RETRO_SOCKET_HELLO_PATH, RETRO_SNAPSHOT_PATH,
   RETRO_MAX_RETRIES, RETRO_RETRY_FLOOR_MS, RETRO_RETRY_STEP_MS,
   RETRO_REQUEST_TIMEOUT_SECS

Use --config <file.toml> to load the same keys from a TOML file instead.")]
struct Cli {
    /// Load settings from a TOML file instead of the environment
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the API host, e.g. retro.example.com:443
    #[arg(long, global = true)]
    host: Option<String>,

    /// Use wss:// and https://
    #[arg(long, global = true)]
    secure: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a session and follow its changes until Ctrl-C
    Watch { session_id: String },

    /// Print the websocket and snapshot endpoints of a session
    Endpoint { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path).await?,
        None => ClientConfig::from_env()?,
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if cli.secure {
        config.secure = true;
    }
    config.validate()?;

    match cli.command {
        Commands::Endpoint { session_id } => {
            println!(
                "{} {}",
                "socket:  ".bright_black(),
                config.socket_url(&session_id)?.as_str().bright_blue()
            );
            println!(
                "{} {}",
                "snapshot:".bright_black(),
                config.snapshot_url(&session_id)?.as_str().bright_blue()
            );
        }

        Commands::Watch { session_id } => watch(config, &session_id).await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("retro_live=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn watch(config: ClientConfig, session_id: &str) -> Result<()> {
    println!(
        "{}",
        format!("📡 Joining retrospective {}...", session_id)
            .cyan()
            .bold()
    );

    let store = RetrospectiveStore::new();
    let manager = ConnectionManager::new(
        &config,
        Collaborators {
            connector: Arc::new(WsConnector),
            fetcher: Arc::new(HttpSnapshotFetcher::new(config.clone())?),
            sink: Arc::new(store.clone()),
            notifier: Arc::new(ConsoleNotifier),
        },
    )?;
    manager.connect(session_id).await?;

    let mut status = manager.subscribe_state();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.disconnect(LEAVE_REASON).await?;
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                tracing::debug!(state = %current.state, retries = current.retries, "status changed");
                if current.state == ConnectionState::Abandoned {
                    break;
                }
            }
        }
    }

    let state = store.snapshot();
    println!("\n{}", "─".repeat(60).bright_black());
    println!(
        "{} {} | {} {} | {} {}",
        "questions".bright_black(),
        state.questions.len().to_string().bright_white().bold(),
        "answers".bright_black(),
        state.answers.len().to_string().bright_white().bold(),
        "updates".bright_black(),
        state.version.to_string().bright_white().bold()
    );

    if manager.state() == ConnectionState::Abandoned {
        anyhow::bail!("connection to session {} was abandoned", session_id);
    }
    Ok(())
}
