// src/logging.rs

//! Logging setup for `taskbox` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `TASKBOX_LOG` environment variable, as an `EnvFilter` directive
//!    (e.g. "debug" or "taskbox::engine=trace")
//! 3. default to `info`
//!
//! Logs are sent to STDERR so that stdout stays reserved for the task
//! container's output.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "TASKBOX_LOG";

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV_VAR).ok();

    fmt()
        .with_env_filter(filter_for(cli_level, env.as_deref()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))
}

fn filter_for(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(directive(level));
    }

    env.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_wins_over_environment() {
        let filter = filter_for(Some(LogLevel::Warn), Some("trace"));
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn environment_directive_is_used_when_valid() {
        assert_eq!(filter_for(None, Some("debug")).to_string(), "debug");
        assert_eq!(filter_for(None, Some("")).to_string(), "info");
        assert_eq!(filter_for(None, None).to_string(), "info");
    }
}
