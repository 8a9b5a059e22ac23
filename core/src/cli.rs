use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::demo;
use crate::engine::ExecutionContext;
use crate::logging;
use crate::scheduler::{Scheduler, SessionOutcome};
use crate::session::{MailboxSession, Session};

#[derive(Parser)]
#[command(name = "choreo")]
#[command(about = "Choreo - session execution engine diagnostics", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the effective configuration as TOML
    Config,

    /// Run the checkout saga on a live scheduler
    Saga {
        /// Decline the payment so the reservation is compensated
        #[arg(long)]
        decline: bool,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let config = Config::builder()
        .config_path(cli.config.map(PathBuf::from))
        .build()
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Config => {
            let text = config
                .to_toml()
                .context("Failed to render configuration")?;
            println!("{}", text);
        }

        Commands::Saga { decline } => {
            logging::init(&config.logging)?;

            let scheduler =
                Scheduler::new(config.engine.clone()).context("Failed to create scheduler")?;
            let session: Arc<dyn Session> = Arc::new(MailboxSession::new());
            let ctx = ExecutionContext::root(
                Arc::clone(&session),
                scheduler,
                Some(demo::checkout(decline)),
            );

            let outcome = ctx.start().await.context("Session task panicked")?;

            println!("Session: {}", session.session_id());
            match &outcome {
                SessionOutcome::Completed => println!("Outcome: completed"),
                SessionOutcome::Killed(fault) => println!("Outcome: killed ({})", fault),
                SessionOutcome::Escalated(fault) => println!("Outcome: escalated ({})", fault),
                SessionOutcome::Failed(fault) => println!("Outcome: failed ({})", fault),
            }

            println!("\nLog:");
            if let Some(serde_json::Value::Array(entries)) = session.state().get("log") {
                for entry in entries {
                    println!("  {}", entry);
                }
            }

            let root_scope = ctx.snapshot_scope().context("Root scope missing")?;
            for name in [demo::CHECKOUT_SCOPE, demo::RESERVE_SCOPE] {
                if root_scope.has_compensation(name) {
                    println!("Pending compensation: {}", name);
                }
            }

            if let Some(fault) = outcome.fault() {
                anyhow::bail!("Session ended with fault {}", fault);
            }
        }
    }

    Ok(())
}
