//! Configuration loading and command-line overrides.
//!
//! Precedence, lowest to highest: built-in defaults, `config.toml`, then
//! flags / `BATCHER_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use batcher_types::config::{BatcherConfig, LogFormat, LogLevel, LogOutput};

/// A configuration together with the file it came from, if any.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: BatcherConfig,
    pub path: Option<PathBuf>,
}

/// Default config location: `~/.batcher/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".batcher").join("config.toml"))
}

/// Load configuration from `explicit`, or from the default location.
///
/// A missing explicit file is an error; a missing default file yields the
/// built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig> {
    if let Some(path) = explicit {
        return read_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => read_config(&path),
        _ => Ok(LoadedConfig {
            config: BatcherConfig::default(),
            path: None,
        }),
    }
}

fn read_config(path: &Path) -> Result<LoadedConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: BatcherConfig = toml::from_str(&raw)
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(LoadedConfig {
        config,
        path: Some(path.to_path_buf()),
    })
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<LogLevel>,
    pub log_format: Option<LogFormat>,
    pub log_output: Option<LogOutput>,
    pub capacity: Option<usize>,
    pub subscribers: Option<usize>,
    /// `-v` count; raises the level to DEBUG unless a level was given.
    pub verbose: u8,
    /// `--json` output owns stdout, so logs move to stderr unless
    /// `log_output` names a stream explicitly.
    pub json: bool,
}

impl Overrides {
    /// Apply on top of `config` and validate the result.
    pub fn apply(self, mut config: BatcherConfig) -> Result<BatcherConfig> {
        if let Some(level) = self.log_level {
            config.log.level = level;
        } else if self.verbose > 0 {
            config.log.level = LogLevel::Debug;
        }
        if let Some(format) = self.log_format {
            config.log.format = format;
        }
        if let Some(output) = self.log_output {
            config.log.output = output;
        } else if self.json {
            config.log.output = LogOutput::Stderr;
        }
        if let Some(capacity) = self.capacity {
            config.bus.capacity = capacity;
        }
        if let Some(subscribers) = self.subscribers {
            config.bus.subscribers = subscribers;
        }

        config.validate()?;
        Ok(config)
    }
}
