//! Error types for the checknet monitor.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a probe adapter. Always transient: the cycle that hit
/// one is skipped and the loop carries on.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn probe command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not parse probe output: {0}")]
    Parse(String),
}

/// Hard transport errors from a notifier. A notification that simply was
/// not accepted is reported as `Ok(false)`, not as an error.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
}

/// Invalid or incomplete configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration: {0}")]
    Duration(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
