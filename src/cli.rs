// src/cli.rs

//! CLI argument parsing using `clap`.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::engine::execution_manager::default_parallelism;
use crate::engine::task_runner::TaskRunOptions;
use crate::types::{CleanupOption, OutputStyle};

/// Command-line arguments for `taskbox`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskbox",
    version,
    about = "Run tasks in containers with their dependencies started alongside.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "taskbox.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKBOX_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Print the available tasks, grouped, and exit.
    #[arg(long)]
    pub list_tasks: bool,

    /// Print the execution order and the planned run steps without
    /// contacting the container runtime.
    #[arg(long)]
    pub dry_run: bool,

    /// Leave containers in place if the task fails.
    #[arg(long)]
    pub no_cleanup_after_failure: bool,

    /// Leave containers in place (stopped) if the task succeeds.
    #[arg(long)]
    pub no_cleanup_after_success: bool,

    /// Shorthand for both `--no-cleanup-after-failure` and
    /// `--no-cleanup-after-success`.
    #[arg(long)]
    pub no_cleanup: bool,

    /// Don't pass the host's proxy variables to builds and containers.
    #[arg(long)]
    pub no_proxy_vars: bool,

    /// Run only the named task, not its prerequisites.
    #[arg(long)]
    pub skip_prerequisites: bool,

    /// Maximum number of steps running at once (default: twice the CPU count).
    #[arg(long, value_name = "N")]
    pub max_parallelism: Option<usize>,

    /// Seconds a container gets to stop before it is killed.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub stop_grace_period: u64,

    /// How output is shown: quiet, simple or all.
    #[arg(long, value_name = "STYLE", default_value = "simple")]
    pub output: OutputStyle,

    /// The task to run.
    #[arg(value_name = "TASK", required_unless_present = "list_tasks")]
    pub task: Option<String>,

    /// Extra arguments appended to the main container's command.
    #[arg(last = true, value_name = "ARGS")]
    pub additional_arguments: Vec<String>,
}

impl CliArgs {
    pub fn cleanup_after_failure(&self) -> CleanupOption {
        CleanupOption::from_disabled_flag(self.no_cleanup || self.no_cleanup_after_failure)
    }

    pub fn cleanup_after_success(&self) -> CleanupOption {
        CleanupOption::from_disabled_flag(self.no_cleanup || self.no_cleanup_after_success)
    }

    pub fn task_run_options(&self) -> TaskRunOptions {
        TaskRunOptions {
            additional_arguments: self.additional_arguments.clone(),
            cleanup_after_success: self.cleanup_after_success(),
            cleanup_after_failure: self.cleanup_after_failure(),
            propagate_proxy_variables: !self.no_proxy_vars,
            max_parallelism: self.max_parallelism.unwrap_or_else(default_parallelism),
            stop_grace_period: Duration::from_secs(self.stop_grace_period),
            output_style: self.output,
            skip_prerequisites: self.skip_prerequisites,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_arguments_follow_the_separator() {
        let args = CliArgs::try_parse_from(["taskbox", "test", "--", "--verbose", "-x"]).unwrap();
        assert_eq!(args.task.as_deref(), Some("test"));
        assert_eq!(args.additional_arguments, ["--verbose", "-x"]);
    }

    #[test]
    fn no_cleanup_disables_both() {
        let args = CliArgs::try_parse_from(["taskbox", "--no-cleanup", "test"]).unwrap();
        assert_eq!(args.cleanup_after_failure(), CleanupOption::DontCleanup);
        assert_eq!(args.cleanup_after_success(), CleanupOption::DontCleanup);

        let args = CliArgs::try_parse_from(["taskbox", "--no-cleanup-after-failure", "test"]).unwrap();
        assert_eq!(args.cleanup_after_failure(), CleanupOption::DontCleanup);
        assert_eq!(args.cleanup_after_success(), CleanupOption::Cleanup);
    }

    #[test]
    fn task_is_optional_only_when_listing() {
        assert!(CliArgs::try_parse_from(["taskbox"]).is_err());
        assert!(CliArgs::try_parse_from(["taskbox", "--list-tasks"]).is_ok());
    }

    #[test]
    fn run_options_follow_flags() {
        let args = CliArgs::try_parse_from([
            "taskbox",
            "--max-parallelism",
            "3",
            "--stop-grace-period",
            "2",
            "--output",
            "all",
            "--no-proxy-vars",
            "test",
        ])
        .unwrap();
        let options = args.task_run_options();
        assert_eq!(options.max_parallelism, 3);
        assert_eq!(options.stop_grace_period, Duration::from_secs(2));
        assert_eq!(options.output_style, OutputStyle::All);
        assert!(!options.propagate_proxy_variables);
    }
}
