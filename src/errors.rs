// src/errors.rs

//! Crate-wide error types and aliases.

use thiserror::Error;

use crate::engine::events::TaskEventKind;

#[derive(Error, Debug)]
pub enum TaskboxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Problems found while resolving which containers and tasks take part in a run.
///
/// These are all detected before any step is queued, so there is never
/// anything to clean up when one of them is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error(
        "The task '{task}' does not exist.{} (Run 'taskbox --list-tasks' for a list of all tasks in this project.)",
        did_you_mean(.suggestions)
    )]
    UnknownTask {
        task: String,
        suggestions: Vec<String>,
    },

    #[error(
        "The task '{prerequisite}' given as a prerequisite of '{task}' does not exist.{}",
        did_you_mean(.suggestions)
    )]
    UnknownPrerequisite {
        task: String,
        prerequisite: String,
        suggestions: Vec<String>,
    },

    #[error("The container '{name}' referenced by {referenced_by} does not exist.")]
    UnknownContainer { name: String, referenced_by: String },

    #[error("The task '{0}' does not define a container to run.")]
    TaskHasNoContainer(String),

    #[error("The container '{0}' cannot depend on itself.")]
    SelfDependency(String),

    #[error(
        "The task '{task}' cannot have the container '{container}' as both the main task container and also a dependency."
    )]
    MainContainerIsDependency { task: String, container: String },

    #[error("There is a dependency cycle in task '{task}'. {description}")]
    DependencyCycle {
        task: String,
        description: String,
        path: Vec<String>,
    },

    #[error("There is a dependency cycle between tasks: {0}.")]
    PrerequisiteCycle(String),
}

/// " Did you mean 'a', 'b' or 'c'?", or nothing without suggestions.
fn did_you_mean(suggestions: &[String]) -> String {
    let quoted: Vec<String> = suggestions.iter().map(|s| format!("'{s}'")).collect();
    match quoted.split_last() {
        None => String::new(),
        Some((only, [])) => format!(" Did you mean {only}?"),
        Some((last, rest)) => format!(" Did you mean {} or {last}?", rest.join(", ")),
    }
}

impl GraphError {
    /// Containers named in a dependency cycle, in traversal order.
    pub fn cycle_path(&self) -> Option<&[String]> {
        match self {
            GraphError::DependencyCycle { path, .. } => Some(path.as_slice()),
            _ => None,
        }
    }
}

/// Violations of the engine's own invariants. These are programming errors
/// and abort the task rather than being reported as step failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Expected at most one event of kind {kind:?}, but found {count}.")]
    MultipleEvents { kind: TaskEventKind, count: usize },

    #[error(
        "None of the remaining steps are ready to execute, but there are no steps currently running."
    )]
    NoStepsReady,
}

/// Failure of a single container runtime call.
///
/// Step runners turn these into failure events; they never reach the
/// execution manager as errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("{0}")]
    Failed(String),

    #[error("the operation was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn failed(message: impl Into<String>) -> Self {
        RuntimeError::Failed(message.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskboxError>;
