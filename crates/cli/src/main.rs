//! Shopfront CLI - Schema migrations and store management tools.
//!
//! # Usage
//!
//! ```bash
//! # Apply pending migrations to the hosted Postgres
//! shopfront migrate
//!
//! # Grant admin access to an existing account
//! shopfront admin promote -e owner@example.com
//!
//! # Load categories and products from a YAML catalog
//! shopfront seed -f catalog.yaml
//! ```
//!
//! # Commands
//!
//! - `migrate` - Apply `migrations/` to the database
//! - `admin promote` - Set a profile's role to `admin`
//! - `seed` - Create catalog rows, skipping slugs that already exist

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "shopfront")]
#[command(author, version, about = "Shopfront CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Manage admin access
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
    /// Seed the catalog from a YAML file
    Seed {
        /// Path to the catalog file
        #[arg(short, long, default_value = "catalog.yaml")]
        file: PathBuf,

        /// Parse and validate the file without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Give an existing account admin access
    Promote {
        /// Account email address
        #[arg(short, long)]
        email: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Admin { action } => match action {
            AdminAction::Promote { email } => commands::admin::promote(&email).await?,
        },
        Commands::Seed { file, dry_run } => commands::seed::catalog(&file, dry_run).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_promote() {
        let cli = Cli::try_parse_from(["shopfront", "admin", "promote", "-e", "a@example.com"])
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(
            cli.command,
            Commands::Admin {
                action: AdminAction::Promote { ref email }
            } if email == "a@example.com"
        ));
    }

    #[test]
    fn test_seed_defaults() {
        let cli = Cli::try_parse_from(["shopfront", "seed"]).unwrap_or_else(|e| panic!("{e}"));
        match cli.command {
            Commands::Seed { file, dry_run } => {
                assert_eq!(file, PathBuf::from("catalog.yaml"));
                assert!(!dry_run);
            }
            _ => panic!("expected seed"),
        }
    }
}
