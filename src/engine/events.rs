// src/engine/events.rs

//! Task events: immutable facts recorded while a task executes.
//!
//! Events are the only way information flows from a finished step back into
//! planning. They are stored in an append-only [`EventLog`] owned by the
//! state machine.

use std::fmt;
use std::path::PathBuf;

use crate::config::model::{ContainerName, ImageSource, SetupCommand};
use crate::engine::steps::TaskStep;

/// A container as known to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeContainer {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeNetwork {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeImage {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    CachesInitialised,
    CacheInitialisationFailed {
        message: String,
    },

    TaskNetworkCreated {
        network: RuntimeNetwork,
    },
    TaskNetworkCreationFailed {
        message: String,
    },
    TaskNetworkDeleted,
    TaskNetworkDeletionFailed {
        message: String,
    },

    ImageBuildProgress {
        source: ImageSource,
        message: String,
    },
    ImageBuilt {
        source: ImageSource,
        image: RuntimeImage,
    },
    ImageBuildFailed {
        source: ImageSource,
        message: String,
    },
    ImagePullProgress {
        source: ImageSource,
        message: String,
    },
    ImagePulled {
        source: ImageSource,
        image: RuntimeImage,
    },
    ImagePullFailed {
        source: ImageSource,
        message: String,
    },

    ContainerCreated {
        container: ContainerName,
        runtime: RuntimeContainer,
    },
    ContainerCreationFailed {
        container: ContainerName,
        message: String,
    },
    ContainerStarted {
        container: ContainerName,
    },
    ContainerStartFailed {
        container: ContainerName,
        message: String,
    },
    ContainerBecameHealthy {
        container: ContainerName,
    },
    ContainerDidNotBecomeHealthy {
        container: ContainerName,
        message: String,
    },
    RunningSetupCommand {
        container: ContainerName,
        command: SetupCommand,
        index: usize,
    },
    SetupCommandFailed {
        container: ContainerName,
        command: SetupCommand,
        exit_code: i64,
        output: String,
    },
    SetupCommandExecutionError {
        container: ContainerName,
        command: SetupCommand,
        message: String,
    },
    ContainerBecameReady {
        container: ContainerName,
    },
    RunningContainerExited {
        container: ContainerName,
        exit_code: i64,
    },
    ContainerRunFailed {
        container: ContainerName,
        message: String,
    },
    ContainerStopped {
        container: ContainerName,
    },
    ContainerStopFailed {
        container: ContainerName,
        message: String,
    },
    ContainerRemoved {
        container: ContainerName,
    },
    ContainerRemovalFailed {
        container: ContainerName,
        message: String,
    },

    /// `container` is set when the file is mounted into that container and
    /// so cannot be deleted before the container is removed.
    TemporaryFileCreated {
        container: Option<ContainerName>,
        path: PathBuf,
    },
    TemporaryFileDeleted {
        path: PathBuf,
    },
    TemporaryFileDeletionFailed {
        path: PathBuf,
        message: String,
    },
    TemporaryDirectoryCreated {
        container: Option<ContainerName>,
        path: PathBuf,
    },
    TemporaryDirectoryDeleted {
        path: PathBuf,
    },
    TemporaryDirectoryDeletionFailed {
        path: PathBuf,
        message: String,
    },

    UserInterruptedExecution,
    /// A step runner stopped without reporting an outcome.
    ExecutionFailed {
        message: String,
    },
    StepStarting {
        step: TaskStep,
    },
}

/// Payload-free discriminant of [`TaskEvent`], used for "events of type X"
/// queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskEventKind {
    CachesInitialised,
    CacheInitialisationFailed,
    TaskNetworkCreated,
    TaskNetworkCreationFailed,
    TaskNetworkDeleted,
    TaskNetworkDeletionFailed,
    ImageBuildProgress,
    ImageBuilt,
    ImageBuildFailed,
    ImagePullProgress,
    ImagePulled,
    ImagePullFailed,
    ContainerCreated,
    ContainerCreationFailed,
    ContainerStarted,
    ContainerStartFailed,
    ContainerBecameHealthy,
    ContainerDidNotBecomeHealthy,
    RunningSetupCommand,
    SetupCommandFailed,
    SetupCommandExecutionError,
    ContainerBecameReady,
    RunningContainerExited,
    ContainerRunFailed,
    ContainerStopped,
    ContainerStopFailed,
    ContainerRemoved,
    ContainerRemovalFailed,
    TemporaryFileCreated,
    TemporaryFileDeleted,
    TemporaryFileDeletionFailed,
    TemporaryDirectoryCreated,
    TemporaryDirectoryDeleted,
    TemporaryDirectoryDeletionFailed,
    UserInterruptedExecution,
    ExecutionFailed,
    StepStarting,
}

impl TaskEvent {
    pub fn kind(&self) -> TaskEventKind {
        use TaskEventKind as K;
        match self {
            TaskEvent::CachesInitialised => K::CachesInitialised,
            TaskEvent::CacheInitialisationFailed { .. } => K::CacheInitialisationFailed,
            TaskEvent::TaskNetworkCreated { .. } => K::TaskNetworkCreated,
            TaskEvent::TaskNetworkCreationFailed { .. } => K::TaskNetworkCreationFailed,
            TaskEvent::TaskNetworkDeleted => K::TaskNetworkDeleted,
            TaskEvent::TaskNetworkDeletionFailed { .. } => K::TaskNetworkDeletionFailed,
            TaskEvent::ImageBuildProgress { .. } => K::ImageBuildProgress,
            TaskEvent::ImageBuilt { .. } => K::ImageBuilt,
            TaskEvent::ImageBuildFailed { .. } => K::ImageBuildFailed,
            TaskEvent::ImagePullProgress { .. } => K::ImagePullProgress,
            TaskEvent::ImagePulled { .. } => K::ImagePulled,
            TaskEvent::ImagePullFailed { .. } => K::ImagePullFailed,
            TaskEvent::ContainerCreated { .. } => K::ContainerCreated,
            TaskEvent::ContainerCreationFailed { .. } => K::ContainerCreationFailed,
            TaskEvent::ContainerStarted { .. } => K::ContainerStarted,
            TaskEvent::ContainerStartFailed { .. } => K::ContainerStartFailed,
            TaskEvent::ContainerBecameHealthy { .. } => K::ContainerBecameHealthy,
            TaskEvent::ContainerDidNotBecomeHealthy { .. } => K::ContainerDidNotBecomeHealthy,
            TaskEvent::RunningSetupCommand { .. } => K::RunningSetupCommand,
            TaskEvent::SetupCommandFailed { .. } => K::SetupCommandFailed,
            TaskEvent::SetupCommandExecutionError { .. } => K::SetupCommandExecutionError,
            TaskEvent::ContainerBecameReady { .. } => K::ContainerBecameReady,
            TaskEvent::RunningContainerExited { .. } => K::RunningContainerExited,
            TaskEvent::ContainerRunFailed { .. } => K::ContainerRunFailed,
            TaskEvent::ContainerStopped { .. } => K::ContainerStopped,
            TaskEvent::ContainerStopFailed { .. } => K::ContainerStopFailed,
            TaskEvent::ContainerRemoved { .. } => K::ContainerRemoved,
            TaskEvent::ContainerRemovalFailed { .. } => K::ContainerRemovalFailed,
            TaskEvent::TemporaryFileCreated { .. } => K::TemporaryFileCreated,
            TaskEvent::TemporaryFileDeleted { .. } => K::TemporaryFileDeleted,
            TaskEvent::TemporaryFileDeletionFailed { .. } => K::TemporaryFileDeletionFailed,
            TaskEvent::TemporaryDirectoryCreated { .. } => K::TemporaryDirectoryCreated,
            TaskEvent::TemporaryDirectoryDeleted { .. } => K::TemporaryDirectoryDeleted,
            TaskEvent::TemporaryDirectoryDeletionFailed { .. } => {
                K::TemporaryDirectoryDeletionFailed
            }
            TaskEvent::UserInterruptedExecution => K::UserInterruptedExecution,
            TaskEvent::ExecutionFailed { .. } => K::ExecutionFailed,
            TaskEvent::StepStarting { .. } => K::StepStarting,
        }
    }

    /// Progress-only events. Loggers may show them, planners ignore them.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            TaskEvent::ImageBuildProgress { .. }
                | TaskEvent::ImagePullProgress { .. }
                | TaskEvent::StepStarting { .. }
        )
    }

    /// Whether this event reports a failed step.
    ///
    /// A user interruption is not a failure; it aborts the run stage through
    /// its own path.
    pub fn is_failure(&self) -> bool {
        self.failure_message().is_some()
    }

    /// Human-readable description of a failure event, `None` otherwise.
    pub fn failure_message(&self) -> Option<String> {
        let message = match self {
            TaskEvent::CacheInitialisationFailed { message } => {
                format!("Could not initialise caches: {message}")
            }
            TaskEvent::TaskNetworkCreationFailed { message } => {
                format!("Could not create network for task: {message}")
            }
            TaskEvent::TaskNetworkDeletionFailed { message } => {
                format!("Could not delete the task network: {message}")
            }
            TaskEvent::ImageBuildFailed { source, message } => {
                format!("Could not build image from {source}: {message}")
            }
            TaskEvent::ImagePullFailed { source, message } => {
                format!("Could not pull image '{source}': {message}")
            }
            TaskEvent::ContainerCreationFailed { container, message } => {
                format!("Could not create container '{container}': {message}")
            }
            TaskEvent::ContainerStartFailed { container, message } => {
                format!("Could not start container '{container}': {message}")
            }
            TaskEvent::ContainerDidNotBecomeHealthy { container, message } => {
                format!("Container '{container}' did not become healthy: {message}")
            }
            TaskEvent::SetupCommandFailed {
                container,
                command,
                exit_code,
                output,
            } => {
                let mut text = format!(
                    "Setup command '{}' in container '{}' failed: the command exited with code {}",
                    command.command, container, exit_code
                );
                if output.trim().is_empty() {
                    text.push_str(" and did not produce any output.");
                } else {
                    text.push_str(&format!(" and output:\n{}", output.trim_end()));
                }
                text
            }
            TaskEvent::SetupCommandExecutionError {
                container,
                command,
                message,
            } => format!(
                "Could not run setup command '{}' in container '{}': {}",
                command.command, container, message
            ),
            TaskEvent::ContainerRunFailed { container, message } => {
                format!("Could not run container '{container}': {message}")
            }
            TaskEvent::ContainerStopFailed { container, message } => {
                format!("Could not stop container '{container}': {message}")
            }
            TaskEvent::ContainerRemovalFailed { container, message } => {
                format!("Could not remove container '{container}': {message}")
            }
            TaskEvent::TemporaryFileDeletionFailed { path, message } => format!(
                "Could not delete temporary file '{}': {}",
                path.display(),
                message
            ),
            TaskEvent::TemporaryDirectoryDeletionFailed { path, message } => format!(
                "Could not delete temporary directory '{}': {}",
                path.display(),
                message
            ),
            TaskEvent::ExecutionFailed { message } => {
                format!("An unexpected exception occurred during execution: {message}")
            }
            _ => return None,
        };

        Some(message)
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = self.failure_message() {
            return write!(f, "{message}");
        }

        match self {
            TaskEvent::ContainerCreated { container, runtime } => {
                write!(f, "container '{container}' created as {}", runtime.id)
            }
            TaskEvent::ImageBuildProgress { source, message }
            | TaskEvent::ImagePullProgress { source, message } => {
                write!(f, "{source}: {message}")
            }
            TaskEvent::StepStarting { step } => write!(f, "starting {step}"),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

/// Append-only, ordered history of everything that happened during a task.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<TaskEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TaskEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskEvent> {
        self.events.iter()
    }

    pub fn of_kind(&self, kind: TaskEventKind) -> impl Iterator<Item = &TaskEvent> {
        self.events.iter().filter(move |e| e.kind() == kind)
    }

    pub fn contains_kind(&self, kind: TaskEventKind) -> bool {
        self.of_kind(kind).next().is_some()
    }

    pub fn caches_initialised(&self) -> bool {
        self.contains_kind(TaskEventKind::CachesInitialised)
    }

    pub fn task_network(&self) -> Option<&RuntimeNetwork> {
        self.events.iter().find_map(|e| match e {
            TaskEvent::TaskNetworkCreated { network } => Some(network),
            _ => None,
        })
    }

    /// The image produced for `source` by a build or pull.
    pub fn image_for(&self, source: &ImageSource) -> Option<&RuntimeImage> {
        self.events.iter().find_map(|e| match e {
            TaskEvent::ImageBuilt { source: s, image } | TaskEvent::ImagePulled { source: s, image }
                if s == source =>
            {
                Some(image)
            }
            _ => None,
        })
    }

    pub fn created_container(&self, name: &str) -> Option<&RuntimeContainer> {
        self.events.iter().find_map(|e| match e {
            TaskEvent::ContainerCreated { container, runtime } if container == name => {
                Some(runtime)
            }
            _ => None,
        })
    }

    /// Every created container, in creation order.
    pub fn created_containers(&self) -> impl Iterator<Item = (&ContainerName, &RuntimeContainer)> {
        self.events.iter().filter_map(|e| match e {
            TaskEvent::ContainerCreated { container, runtime } => Some((container, runtime)),
            _ => None,
        })
    }

    pub fn container_started(&self, name: &str) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TaskEvent::ContainerStarted { container } if container == name))
    }

    pub fn container_became_healthy(&self, name: &str) -> bool {
        self.events.iter().any(
            |e| matches!(e, TaskEvent::ContainerBecameHealthy { container } if container == name),
        )
    }

    pub fn container_became_ready(&self, name: &str) -> bool {
        self.events.iter().any(
            |e| matches!(e, TaskEvent::ContainerBecameReady { container } if container == name),
        )
    }

    pub fn container_stopped(&self, name: &str) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TaskEvent::ContainerStopped { container } if container == name))
    }

    pub fn container_removed(&self, name: &str) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, TaskEvent::ContainerRemoved { container } if container == name))
    }

    /// Temporary files and directories, with the container that owns them.
    pub fn temporary_paths(&self) -> impl Iterator<Item = TemporaryPath<'_>> {
        self.events.iter().filter_map(|e| match e {
            TaskEvent::TemporaryFileCreated { container, path } => Some(TemporaryPath {
                path,
                container: container.as_ref(),
                is_directory: false,
            }),
            TaskEvent::TemporaryDirectoryCreated { container, path } => Some(TemporaryPath {
                path,
                container: container.as_ref(),
                is_directory: true,
            }),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TemporaryPath<'a> {
    pub path: &'a PathBuf,
    pub container: Option<&'a ContainerName>,
    pub is_directory: bool,
}
