//! Gantry Runner
//!
//! A self-hosted CI runner that attaches to a hosted pipeline control
//! plane, fetches job assignments from its encrypted message queue, and
//! executes them through the workflow engine.
//!
//! Architecture:
//! - Credentials: persisted RSA identity and agent record
//! - Client: typed HTTP access to the control plane (gantry-client)
//! - Pump: session lifecycle and message long-poll
//! - Job: per-job translation, timeline, log streaming, lease renewal

mod commands;
mod config;
mod credentials;
mod job;
mod pump;
mod session;
mod token;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{handle_command, Commands};
use crate::config::RunnerSettings;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Self-hosted CI runner for hosted pipelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = RunnerSettings::default();

    handle_command(cli.command, &settings).await
}
