use thiserror::Error;

/// Errors raised while parsing or validating configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("invalid log format: {0}")]
    InvalidLogFormat(String),

    #[error("invalid log output: {0}")]
    InvalidLogOutput(String),

    #[error("invalid bus setting: {0}")]
    InvalidBus(String),
}
