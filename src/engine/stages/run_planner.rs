// src/engine/stages/run_planner.rs

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::model::{Container, ImageSource};
use crate::dag::ContainerDependencyGraph;
use crate::engine::rules::RunStepRule;
use crate::engine::steps::ContainerRuntimeConfiguration;

/// Inputs to run-stage planning that do not come from the graph.
#[derive(Debug, Clone, Default)]
pub struct RunStagePlanOptions {
    pub project_name: String,
    /// Appended to the main container's command.
    pub additional_arguments: Vec<String>,
}

/// Build the run-stage rules for `graph`.
///
/// Order: network, caches (only when some container mounts one), one image
/// rule per distinct image source, then per container (by name) create,
/// start, wait-for-healthy and setup-command rules, then the main container's
/// run rule. Gates live in the rules themselves; this order only makes the
/// plan deterministic.
pub fn plan_run_stage(
    graph: &ContainerDependencyGraph,
    options: &RunStagePlanOptions,
) -> Vec<RunStepRule> {
    let mut rules = vec![RunStepRule::CreateTaskNetwork];

    let cache_users: Vec<Container> = graph
        .containers()
        .filter(|c| c.has_cache_mounts())
        .cloned()
        .collect();
    if !cache_users.is_empty() {
        rules.push(RunStepRule::InitialiseCaches {
            containers: cache_users,
        });
    }

    rules.extend(image_rules(graph, &options.project_name));

    let network_members = graph.container_names();

    for container in graph.containers() {
        let config = runtime_configuration(graph, container, &network_members, options);

        rules.push(RunStepRule::CreateContainer {
            container: container.clone(),
            config: config.clone(),
        });

        if graph.is_main(&container.name) {
            continue;
        }

        rules.push(RunStepRule::StartContainer {
            container: container.name.clone(),
            dependencies: graph.dependencies_of(&container.name).clone(),
        });
        rules.push(RunStepRule::WaitForContainerToBecomeHealthy {
            container: container.name.clone(),
        });
        rules.push(RunStepRule::RunContainerSetupCommands {
            container: container.clone(),
            config,
        });
    }

    let main = graph.main_container_name();
    rules.push(RunStepRule::RunContainer {
        container: main.to_string(),
        dependencies: graph.dependencies_of(main).clone(),
    });

    debug!(
        task = %graph.task().name,
        rules = rules.len(),
        "planned run stage"
    );

    rules
}

/// One rule per distinct image source. Builds are tagged once per container
/// that uses them.
fn image_rules(graph: &ContainerDependencyGraph, project_name: &str) -> Vec<RunStepRule> {
    let mut sources: BTreeMap<&ImageSource, BTreeSet<String>> = BTreeMap::new();

    for container in graph.containers() {
        let tags = sources.entry(&container.image_source).or_default();
        if matches!(container.image_source, ImageSource::Build { .. }) {
            tags.insert(format!("{}-{}", project_name, container.name));
        }
    }

    sources
        .into_iter()
        .map(|(source, image_tags)| match source {
            ImageSource::Build { .. } => RunStepRule::BuildImage {
                source: source.clone(),
                image_tags,
            },
            ImageSource::Pull { .. } => RunStepRule::PullImage {
                source: source.clone(),
            },
        })
        .collect()
}

fn runtime_configuration(
    graph: &ContainerDependencyGraph,
    container: &Container,
    network_members: &BTreeSet<String>,
    options: &RunStagePlanOptions,
) -> ContainerRuntimeConfiguration {
    let mut config = ContainerRuntimeConfiguration {
        command: container.command.clone(),
        additional_arguments: Vec::new(),
        entrypoint: container.entrypoint.clone(),
        working_directory: container.working_directory.clone(),
        environment: container.environment.clone(),
        port_mappings: container.port_mappings.clone(),
        all_containers_in_network: network_members.clone(),
    };

    if graph.is_main(&container.name) {
        let run = graph.run_configuration();
        if run.command.is_some() {
            config.command = run.command.clone();
        }
        if run.working_directory.is_some() {
            config.working_directory = run.working_directory.clone();
        }
        config.environment.extend(run.environment.clone());
        config.port_mappings.extend(run.ports.iter().cloned());
        config.additional_arguments = options.additional_arguments.clone();
    }

    config
}
