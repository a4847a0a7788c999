//! batcher CLI entry point.
//!
//! Binary name: `batcher`
//!
//! Parses CLI arguments, resolves configuration, initializes logging and
//! dispatches to the command handler.

mod cli;
mod settings;

use anyhow::anyhow;
use clap::Parser;
use clap_complete::generate;

use batcher_observe::tracing_setup::{init_tracing, shutdown_tracing};
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need configuration
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "batcher", &mut std::io::stdout());
        return Ok(());
    }

    let mut loaded = settings::load_config(cli.config.as_deref())?;
    loaded.config = cli.overrides().apply(loaded.config)?;

    match cli.command {
        Commands::Config => {
            cli::config::show(&loaded, cli.json)?;
        }

        Commands::Run { .. } => {
            init_tracing(&loaded.config.log, cli.otel)
                .map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

            let outcome = cli::run::run(&loaded.config, cli.json).await;
            shutdown_tracing();

            // stdin reads block a runtime thread, so exit directly on signal
            if let Some(code) = outcome? {
                std::process::exit(code);
            }
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
