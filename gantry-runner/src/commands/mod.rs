//! Commands module
//!
//! The two faces of the runner binary: one-shot enrollment and the
//! long-running job service loop.

mod configure;
mod run;

use anyhow::Result;
use clap::Subcommand;

use crate::config::RunnerSettings;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Register this runner with your repository or enterprise
    Configure {
        /// URL of your repository, organization, or enterprise
        #[arg(long)]
        url: String,

        /// Runner registration token
        #[arg(long)]
        token: String,

        /// Labels for the new runner
        #[arg(short = 'l', long = "label")]
        labels: Vec<String>,

        /// Custom runner name
        #[arg(long)]
        name: Option<String>,
    },
    /// Open a session and service jobs until interrupted
    Run {
        /// Execute at most one job, then exit
        #[arg(long)]
        once: bool,
    },
}

/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, settings: &RunnerSettings) -> Result<()> {
    match command {
        Commands::Configure {
            url,
            token,
            labels,
            name,
        } => configure::configure(settings, url, token, labels, name).await,
        Commands::Run { once } => run::run(settings, once).await,
    }
}
