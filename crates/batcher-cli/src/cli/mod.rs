//! CLI command definitions for the `batcher` binary.
//!
//! Uses clap derive macros for argument parsing. Every logging and bus
//! setting can also come from a `BATCHER_*` environment variable.

pub mod config;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use batcher_types::config::{LogFormat, LogLevel, LogOutput};

use crate::settings::Overrides;

/// Fan stdin out to independent consumers over an in-process event bus.
#[derive(Parser)]
#[command(name = "batcher", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v raises the log level to DEBUG).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config.toml (defaults to ~/.batcher/config.toml).
    #[arg(long, global = true, env = "BATCHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level: DEBUG, INFO, WARN or ERROR.
    #[arg(long, global = true, env = "BATCHER_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Log format: text or json.
    #[arg(long, global = true, env = "BATCHER_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Log destination: stdout or stderr (stderr by default with --json).
    #[arg(long, global = true, env = "BATCHER_LOG_OUTPUT")]
    pub log_output: Option<LogOutput>,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read stdin line by line and publish each line to every subscriber.
    Run {
        /// Per-subscriber queue capacity (0 = hand-off only).
        #[arg(long, env = "BATCHER_CAPACITY")]
        capacity: Option<usize>,

        /// Number of consumer tasks.
        #[arg(long, env = "BATCHER_SUBSCRIBERS")]
        subscribers: Option<usize>,
    },

    /// Print the effective configuration.
    Config,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

impl Cli {
    /// Collect every flag that overrides a config file value.
    pub fn overrides(&self) -> Overrides {
        let (capacity, subscribers) = match &self.command {
            Commands::Run {
                capacity,
                subscribers,
            } => (*capacity, *subscribers),
            _ => (None, None),
        };

        Overrides {
            log_level: self.log_level,
            log_format: self.log_format,
            log_output: self.log_output,
            capacity,
            subscribers,
            verbose: self.verbose,
            json: self.json,
        }
    }
}
