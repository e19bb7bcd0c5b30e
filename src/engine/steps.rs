// src/engine/steps.rs

//! Task steps: immutable descriptions of one unit of work.
//!
//! A step carries only the data needed to execute it. It never refers to
//! engine state, so it can be handed to a runner on another task.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use crate::config::model::{Container, ContainerName, ImageSource, PortMapping};
use crate::engine::events::{RuntimeContainer, RuntimeImage, RuntimeNetwork};

/// Resolved settings for one container in one task.
///
/// Task-level additions (command, environment, ports, extra arguments) are
/// already applied for the main container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerRuntimeConfiguration {
    pub command: Option<String>,
    pub additional_arguments: Vec<String>,
    pub entrypoint: Option<String>,
    pub working_directory: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub port_mappings: Vec<PortMapping>,
    /// Every container attached to the task network, used for aliases and
    /// `no_proxy`.
    pub all_containers_in_network: BTreeSet<ContainerName>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStep {
    /// Carries every container in the task that mounts a cache.
    InitialiseCaches {
        containers: Vec<Container>,
    },
    CreateTaskNetwork,
    BuildImage {
        source: ImageSource,
        image_tags: BTreeSet<String>,
    },
    PullImage {
        source: ImageSource,
    },
    CreateContainer {
        container: Container,
        config: ContainerRuntimeConfiguration,
        image: RuntimeImage,
        network: RuntimeNetwork,
    },
    StartContainer {
        container: ContainerName,
        runtime: RuntimeContainer,
    },
    WaitForContainerToBecomeHealthy {
        container: ContainerName,
        runtime: RuntimeContainer,
    },
    RunContainerSetupCommands {
        container: Container,
        config: ContainerRuntimeConfiguration,
        runtime: RuntimeContainer,
    },
    RunContainer {
        container: ContainerName,
        runtime: RuntimeContainer,
    },
    StopContainer {
        container: ContainerName,
        runtime: RuntimeContainer,
    },
    RemoveContainer {
        container: ContainerName,
        runtime: RuntimeContainer,
    },
    DeleteTemporaryFile {
        path: PathBuf,
    },
    DeleteTemporaryDirectory {
        path: PathBuf,
    },
    DeleteTaskNetwork {
        network: RuntimeNetwork,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskStepKind {
    InitialiseCaches,
    CreateTaskNetwork,
    BuildImage,
    PullImage,
    CreateContainer,
    StartContainer,
    WaitForContainerToBecomeHealthy,
    RunContainerSetupCommands,
    RunContainer,
    StopContainer,
    RemoveContainer,
    DeleteTemporaryFile,
    DeleteTemporaryDirectory,
    DeleteTaskNetwork,
}

impl TaskStep {
    pub fn kind(&self) -> TaskStepKind {
        match self {
            TaskStep::InitialiseCaches { .. } => TaskStepKind::InitialiseCaches,
            TaskStep::CreateTaskNetwork => TaskStepKind::CreateTaskNetwork,
            TaskStep::BuildImage { .. } => TaskStepKind::BuildImage,
            TaskStep::PullImage { .. } => TaskStepKind::PullImage,
            TaskStep::CreateContainer { .. } => TaskStepKind::CreateContainer,
            TaskStep::StartContainer { .. } => TaskStepKind::StartContainer,
            TaskStep::WaitForContainerToBecomeHealthy { .. } => {
                TaskStepKind::WaitForContainerToBecomeHealthy
            }
            TaskStep::RunContainerSetupCommands { .. } => TaskStepKind::RunContainerSetupCommands,
            TaskStep::RunContainer { .. } => TaskStepKind::RunContainer,
            TaskStep::StopContainer { .. } => TaskStepKind::StopContainer,
            TaskStep::RemoveContainer { .. } => TaskStepKind::RemoveContainer,
            TaskStep::DeleteTemporaryFile { .. } => TaskStepKind::DeleteTemporaryFile,
            TaskStep::DeleteTemporaryDirectory { .. } => TaskStepKind::DeleteTemporaryDirectory,
            TaskStep::DeleteTaskNetwork { .. } => TaskStepKind::DeleteTaskNetwork,
        }
    }

    /// Steps that mostly wait on something else do not take a worker slot.
    pub fn counts_against_parallelism_cap(&self) -> bool {
        !matches!(
            self,
            TaskStep::RunContainer { .. } | TaskStep::WaitForContainerToBecomeHealthy { .. }
        )
    }
}

impl fmt::Display for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStep::InitialiseCaches { .. } => write!(f, "initialise caches"),
            TaskStep::CreateTaskNetwork => write!(f, "create task network"),
            TaskStep::BuildImage { source, .. } => write!(f, "build image from {source}"),
            TaskStep::PullImage { source } => write!(f, "pull image {source}"),
            TaskStep::CreateContainer { container, .. } => {
                write!(f, "create container '{}'", container.name)
            }
            TaskStep::StartContainer { container, .. } => write!(f, "start container '{container}'"),
            TaskStep::WaitForContainerToBecomeHealthy { container, .. } => {
                write!(f, "wait for container '{container}' to become healthy")
            }
            TaskStep::RunContainerSetupCommands { container, .. } => {
                write!(f, "run setup commands for container '{}'", container.name)
            }
            TaskStep::RunContainer { container, .. } => write!(f, "run container '{container}'"),
            TaskStep::StopContainer { container, .. } => write!(f, "stop container '{container}'"),
            TaskStep::RemoveContainer { container, .. } => {
                write!(f, "remove container '{container}'")
            }
            TaskStep::DeleteTemporaryFile { path } => {
                write!(f, "delete temporary file '{}'", path.display())
            }
            TaskStep::DeleteTemporaryDirectory { path } => {
                write!(f, "delete temporary directory '{}'", path.display())
            }
            TaskStep::DeleteTaskNetwork { network } => {
                write!(f, "delete task network {}", network.id)
            }
        }
    }
}
