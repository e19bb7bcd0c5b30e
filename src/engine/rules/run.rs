// src/engine/rules/run.rs

use std::collections::BTreeSet;
use std::fmt;

use crate::config::model::{Container, ContainerName, ImageSource};
use crate::engine::events::EventLog;
use crate::engine::rules::{RuleEvaluation, StepRule};
use crate::engine::steps::{ContainerRuntimeConfiguration, TaskStep};

/// Rules of the run stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStepRule {
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
    /// Waits for the image and the network, and for the caches when the
    /// container mounts any.
    CreateContainer {
        container: Container,
        config: ContainerRuntimeConfiguration,
    },
    /// Waits for the container to exist and every dependency to be ready.
    StartContainer {
        container: ContainerName,
        dependencies: BTreeSet<ContainerName>,
    },
    WaitForContainerToBecomeHealthy {
        container: ContainerName,
    },
    RunContainerSetupCommands {
        container: Container,
        config: ContainerRuntimeConfiguration,
    },
    /// The main container. Same gate as `StartContainer`.
    RunContainer {
        container: ContainerName,
        dependencies: BTreeSet<ContainerName>,
    },
}

impl fmt::Display for RunStepRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStepRule::InitialiseCaches { containers } => {
                let names: Vec<&str> = containers.iter().map(|c| c.name.as_str()).collect();
                write!(f, "initialise caches for {}", names.join(", "))
            }
            RunStepRule::CreateTaskNetwork => write!(f, "create task network"),
            RunStepRule::BuildImage { source, image_tags } => {
                let tags: Vec<&str> = image_tags.iter().map(String::as_str).collect();
                write!(f, "build image from {source} tagged {}", tags.join(", "))
            }
            RunStepRule::PullImage { source } => write!(f, "pull image {source}"),
            RunStepRule::CreateContainer { container, .. } => {
                write!(f, "create container '{}'", container.name)
            }
            RunStepRule::StartContainer {
                container,
                dependencies,
            } => write!(f, "start container '{container}'{}", after(dependencies)),
            RunStepRule::WaitForContainerToBecomeHealthy { container } => {
                write!(f, "wait for container '{container}' to become healthy")
            }
            RunStepRule::RunContainerSetupCommands { container, .. } => write!(
                f,
                "run {} setup command(s) in container '{}'",
                container.setup_commands.len(),
                container.name
            ),
            RunStepRule::RunContainer {
                container,
                dependencies,
            } => write!(f, "run container '{container}'{}", after(dependencies)),
        }
    }
}

fn after(dependencies: &BTreeSet<ContainerName>) -> String {
    if dependencies.is_empty() {
        return String::new();
    }
    let names: Vec<&str> = dependencies.iter().map(String::as_str).collect();
    format!(" once {} ready", names.join(", "))
}

fn all_ready(events: &EventLog, containers: &BTreeSet<ContainerName>) -> bool {
    containers.iter().all(|c| events.container_became_ready(c))
}

impl StepRule for RunStepRule {
    fn evaluate(&self, events: &EventLog) -> RuleEvaluation {
        match self {
            RunStepRule::InitialiseCaches { containers } => {
                RuleEvaluation::Ready(TaskStep::InitialiseCaches {
                    containers: containers.clone(),
                })
            }
            RunStepRule::CreateTaskNetwork => RuleEvaluation::Ready(TaskStep::CreateTaskNetwork),
            RunStepRule::BuildImage { source, image_tags } => {
                RuleEvaluation::Ready(TaskStep::BuildImage {
                    source: source.clone(),
                    image_tags: image_tags.clone(),
                })
            }
            RunStepRule::PullImage { source } => RuleEvaluation::Ready(TaskStep::PullImage {
                source: source.clone(),
            }),
            RunStepRule::CreateContainer { container, config } => {
                if container.has_cache_mounts() && !events.caches_initialised() {
                    return RuleEvaluation::NotReady;
                }

                match (
                    events.image_for(&container.image_source),
                    events.task_network(),
                ) {
                    (Some(image), Some(network)) => RuleEvaluation::Ready(TaskStep::CreateContainer {
                        container: container.clone(),
                        config: config.clone(),
                        image: image.clone(),
                        network: network.clone(),
                    }),
                    _ => RuleEvaluation::NotReady,
                }
            }
            RunStepRule::StartContainer {
                container,
                dependencies,
            } => match events.created_container(container) {
                Some(runtime) if all_ready(events, dependencies) => {
                    RuleEvaluation::Ready(TaskStep::StartContainer {
                        container: container.clone(),
                        runtime: runtime.clone(),
                    })
                }
                _ => RuleEvaluation::NotReady,
            },
            RunStepRule::WaitForContainerToBecomeHealthy { container } => {
                match events.created_container(container) {
                    Some(runtime) if events.container_started(container) => {
                        RuleEvaluation::Ready(TaskStep::WaitForContainerToBecomeHealthy {
                            container: container.clone(),
                            runtime: runtime.clone(),
                        })
                    }
                    _ => RuleEvaluation::NotReady,
                }
            }
            RunStepRule::RunContainerSetupCommands { container, config } => {
                match events.created_container(&container.name) {
                    Some(runtime) if events.container_became_healthy(&container.name) => {
                        RuleEvaluation::Ready(TaskStep::RunContainerSetupCommands {
                            container: container.clone(),
                            config: config.clone(),
                            runtime: runtime.clone(),
                        })
                    }
                    _ => RuleEvaluation::NotReady,
                }
            }
            RunStepRule::RunContainer {
                container,
                dependencies,
            } => match events.created_container(container) {
                Some(runtime) if all_ready(events, dependencies) => {
                    RuleEvaluation::Ready(TaskStep::RunContainer {
                        container: container.clone(),
                        runtime: runtime.clone(),
                    })
                }
                _ => RuleEvaluation::NotReady,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::events::{RuntimeContainer, TaskEvent};

    fn created(name: &str) -> TaskEvent {
        TaskEvent::ContainerCreated {
            container: name.to_string(),
            runtime: RuntimeContainer {
                id: format!("{name}-id"),
                name: name.to_string(),
            },
        }
    }

    #[test]
    fn start_waits_for_every_dependency_to_be_ready() {
        let rule = RunStepRule::StartContainer {
            container: "app".to_string(),
            dependencies: ["db".to_string(), "cache".to_string()].into(),
        };

        let mut events = EventLog::new();
        events.push(created("app"));
        events.push(TaskEvent::ContainerBecameReady {
            container: "db".to_string(),
        });
        assert_eq!(rule.evaluate(&events), RuleEvaluation::NotReady);

        events.push(TaskEvent::ContainerBecameHealthy {
            container: "cache".to_string(),
        });
        assert_eq!(rule.evaluate(&events), RuleEvaluation::NotReady);

        events.push(TaskEvent::ContainerBecameReady {
            container: "cache".to_string(),
        });
        assert!(matches!(
            rule.evaluate(&events),
            RuleEvaluation::Ready(TaskStep::StartContainer { .. })
        ));
    }
}
