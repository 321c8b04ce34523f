//! Trail CLI - Operator command-line interface
//!
//! Usage:
//!   trail sweep
//!   trail revoke-user <user-id>
//!   trail config show [--json]
//!   trail config check

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trail_api::state::AppState;
use trail_core::AppConfig;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "trail")]
#[command(about = "Trail session maintenance CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true, env = "TRAIL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete expired refresh tokens
    Sweep,
    /// Revoke every refresh token held by a user
    RevokeUser {
        /// User id
        user_id: Uuid,
    },
    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the configuration with secrets masked
    Show {
        /// Print JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and exit non-zero on error
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Sweep => {
            let state = open_state(config).await?;
            let purged = state.sessions.purge_expired().await?;
            println!("Purged {} expired refresh token(s)", purged);
        }
        Commands::RevokeUser { user_id } => {
            let state = open_state(config).await?;
            let revoked = state.sessions.logout_all(user_id).await?;
            tracing::info!(target: "audit", %user_id, revoked, "Sessions revoked by operator");
            println!("Revoked {} refresh token(s) for user {}", revoked, user_id);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { json } => {
                let redacted = config.redacted();
                let rendered = if json {
                    serde_json::to_string_pretty(&redacted)?
                } else {
                    toml::to_string_pretty(&redacted)?
                };
                println!("{}", rendered);
            }
            ConfigAction::Check => {
                config.validate()?;
                println!("Configuration OK ({:?})", config.environment);
            }
        },
    }

    Ok(())
}

async fn open_state(config: AppConfig) -> anyhow::Result<AppState> {
    config.validate().context("invalid configuration")?;
    AppState::from_config(config)
        .await
        .context("opening session storage")
}
