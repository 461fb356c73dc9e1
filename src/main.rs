use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use hierovision::auth::{SessionManager, SqliteRevocationStore, SystemClock, TokenCodec};
use hierovision::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hierovision", version, about = "Session-token authentication gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Bind address (defaults to [gateway] host)
        #[arg(long)]
        host: Option<String>,
        /// Port (defaults to [gateway] port)
        #[arg(long)]
        port: Option<u16>,
        /// Path to config.toml
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Delete revocation entries for tokens that have expired
    Prune {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Serve { host, port, config } => {
            let config = Config::load(config.as_deref())?;
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let port = port.unwrap_or(config.gateway.port);
            hierovision::gateway::run_gateway(&host, port, config).await
        }
        Command::Prune { config } => prune(&Config::load(config.as_deref())?),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "hierovision", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn prune(config: &Config) -> Result<()> {
    config.validate()?;
    let db_path = config.database.resolved_path()?;
    let store = Arc::new(
        SqliteRevocationStore::open(&db_path).context("Failed to open revocation store")?,
    );
    let codec = TokenCodec::new(
        config.auth.secret_key.as_deref().unwrap_or_default(),
        Arc::new(SystemClock),
    )?;
    let sessions = SessionManager::new(codec, store, config.auth.session_ttl_secs)?;
    let removed = sessions.prune_revocations()?;
    let remaining = sessions.revocation_count()?;
    tracing::info!(removed, remaining, db = %db_path.display(), "Pruned expired revocations");
    Ok(())
}
