// src/engine/rules/cleanup.rs

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::model::ContainerName;
use crate::engine::events::{EventLog, RuntimeContainer, RuntimeNetwork};
use crate::engine::rules::{RuleEvaluation, StepRule};
use crate::engine::steps::TaskStep;

/// Order in which manual cleanup instructions are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManualCleanupSortOrder {
    StopContainers,
    RemoveContainers,
    DeleteTaskNetwork,
    DeleteTemporaryFiles,
    DeleteTemporaryDirectories,
}

/// Rules of the cleanup stage.
///
/// Each rule references only resources that an event says exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CleanupStepRule {
    /// Dependents have to be stopped before the containers they depend on.
    StopContainer {
        container: ContainerName,
        runtime: RuntimeContainer,
        must_be_stopped_first: BTreeSet<ContainerName>,
    },
    RemoveContainer {
        container: ContainerName,
        runtime: RuntimeContainer,
        was_started: bool,
    },
    DeleteTaskNetwork {
        network: RuntimeNetwork,
        must_be_removed_first: BTreeSet<ContainerName>,
    },
    DeleteTemporaryFile {
        path: PathBuf,
        must_be_removed_first: Option<ContainerName>,
    },
    DeleteTemporaryDirectory {
        path: PathBuf,
        must_be_removed_first: Option<ContainerName>,
    },
}

impl CleanupStepRule {
    pub fn manual_cleanup_sort_order(&self) -> ManualCleanupSortOrder {
        match self {
            CleanupStepRule::StopContainer { .. } => ManualCleanupSortOrder::StopContainers,
            CleanupStepRule::RemoveContainer { .. } => ManualCleanupSortOrder::RemoveContainers,
            CleanupStepRule::DeleteTaskNetwork { .. } => ManualCleanupSortOrder::DeleteTaskNetwork,
            CleanupStepRule::DeleteTemporaryFile { .. } => {
                ManualCleanupSortOrder::DeleteTemporaryFiles
            }
            CleanupStepRule::DeleteTemporaryDirectory { .. } => {
                ManualCleanupSortOrder::DeleteTemporaryDirectories
            }
        }
    }

    /// Shell command that performs this rule's cleanup by hand.
    pub fn manual_cleanup_command(&self) -> String {
        match self {
            CleanupStepRule::StopContainer { runtime, .. } => format!("docker stop {}", runtime.id),
            CleanupStepRule::RemoveContainer { runtime, .. } => {
                format!("docker rm --force --volumes {}", runtime.id)
            }
            CleanupStepRule::DeleteTaskNetwork { network, .. } => {
                format!("docker network rm {}", network.id)
            }
            CleanupStepRule::DeleteTemporaryFile { path, .. } => format!("rm {}", path.display()),
            CleanupStepRule::DeleteTemporaryDirectory { path, .. } => {
                format!("rm -rf {}", path.display())
            }
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, CleanupStepRule::StopContainer { .. })
    }
}

fn removed_if_required(events: &EventLog, container: Option<&ContainerName>) -> bool {
    container.is_none_or(|c| events.container_removed(c))
}

impl StepRule for CleanupStepRule {
    fn evaluate(&self, events: &EventLog) -> RuleEvaluation {
        match self {
            CleanupStepRule::StopContainer {
                container,
                runtime,
                must_be_stopped_first,
            } => {
                if must_be_stopped_first
                    .iter()
                    .all(|c| events.container_stopped(c))
                {
                    RuleEvaluation::Ready(TaskStep::StopContainer {
                        container: container.clone(),
                        runtime: runtime.clone(),
                    })
                } else {
                    RuleEvaluation::NotReady
                }
            }
            CleanupStepRule::RemoveContainer {
                container,
                runtime,
                was_started,
            } => {
                if *was_started && !events.container_stopped(container) {
                    RuleEvaluation::NotReady
                } else {
                    RuleEvaluation::Ready(TaskStep::RemoveContainer {
                        container: container.clone(),
                        runtime: runtime.clone(),
                    })
                }
            }
            CleanupStepRule::DeleteTaskNetwork {
                network,
                must_be_removed_first,
            } => {
                if must_be_removed_first
                    .iter()
                    .all(|c| events.container_removed(c))
                {
                    RuleEvaluation::Ready(TaskStep::DeleteTaskNetwork {
                        network: network.clone(),
                    })
                } else {
                    RuleEvaluation::NotReady
                }
            }
            CleanupStepRule::DeleteTemporaryFile {
                path,
                must_be_removed_first,
            } => {
                if removed_if_required(events, must_be_removed_first.as_ref()) {
                    RuleEvaluation::Ready(TaskStep::DeleteTemporaryFile { path: path.clone() })
                } else {
                    RuleEvaluation::NotReady
                }
            }
            CleanupStepRule::DeleteTemporaryDirectory {
                path,
                must_be_removed_first,
            } => {
                if removed_if_required(events, must_be_removed_first.as_ref()) {
                    RuleEvaluation::Ready(TaskStep::DeleteTemporaryDirectory { path: path.clone() })
                } else {
                    RuleEvaluation::NotReady
                }
            }
        }
    }
}
