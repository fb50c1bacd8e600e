mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grader_common::config;
use grader_common::redis::RedisStore;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "grader-cli")]
#[command(about = "Grader CLI - Seed assessments, inspect and re-run submission evaluations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an assessment and its assignments from a JSON fixture
    Seed {
        /// Fixture file (see fixtures/)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Queue an explicit re-evaluation of a submission
    Reevaluate {
        /// Submission id
        #[arg(short, long)]
        submission: Uuid,
    },

    /// Print a submission's verdict, test results and final grade
    Show {
        /// Submission id
        #[arg(short, long)]
        submission: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let redis_url = config::redis_url();
    let store = RedisStore::connect(&redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", redis_url))?;

    match cli.command {
        Commands::Seed { file } => {
            commands::seed(&store, &file).await?;
        }
        Commands::Reevaluate { submission } => {
            commands::reevaluate(&store, submission).await?;
        }
        Commands::Show { submission } => {
            commands::show(&store, submission).await?;
        }
    }

    Ok(())
}
