// src/engine/stages/cleanup_planner.rs

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::model::ContainerName;
use crate::dag::ContainerDependencyGraph;
use crate::engine::events::{EventLog, TaskEvent};
use crate::engine::rules::CleanupStepRule;

/// Derive cleanup rules from what the event log says actually happened.
///
/// The result is sorted (manual cleanup order first, then by value), so two
/// calls with the same events return the same rules.
pub fn plan_cleanup_stage(
    graph: &ContainerDependencyGraph,
    events: &EventLog,
) -> Vec<CleanupStepRule> {
    let created: Vec<_> = events.created_containers().collect();
    let started: BTreeSet<&ContainerName> = events
        .iter()
        .filter_map(|e| match e {
            TaskEvent::ContainerStarted { container } => Some(container),
            _ => None,
        })
        .filter(|c| events.created_container(c).is_some())
        .collect();

    let mut rules = Vec::new();

    for (container, runtime) in created.iter() {
        let was_started = started.contains(container);

        if was_started {
            let must_be_stopped_first = graph
                .dependents_of(container)
                .iter()
                .filter(|d| started.contains(d))
                .cloned()
                .collect();

            rules.push(CleanupStepRule::StopContainer {
                container: (*container).clone(),
                runtime: (*runtime).clone(),
                must_be_stopped_first,
            });
        }

        rules.push(CleanupStepRule::RemoveContainer {
            container: (*container).clone(),
            runtime: (*runtime).clone(),
            was_started,
        });
    }

    if let Some(network) = events.task_network() {
        rules.push(CleanupStepRule::DeleteTaskNetwork {
            network: network.clone(),
            must_be_removed_first: created.iter().map(|(c, _)| (*c).clone()).collect(),
        });
    }

    for temp in events.temporary_paths() {
        // A file owned by a container that was never created can go at once.
        let must_be_removed_first = temp
            .container
            .filter(|c| events.created_container(c).is_some())
            .cloned();

        rules.push(if temp.is_directory {
            CleanupStepRule::DeleteTemporaryDirectory {
                path: temp.path.clone(),
                must_be_removed_first,
            }
        } else {
            CleanupStepRule::DeleteTemporaryFile {
                path: temp.path.clone(),
                must_be_removed_first,
            }
        });
    }

    rules.sort_by(|a, b| {
        a.manual_cleanup_sort_order()
            .cmp(&b.manual_cleanup_sort_order())
            .then_with(|| a.cmp(b))
    });
    rules.dedup();

    debug!(
        task = %graph.task().name,
        rules = rules.len(),
        "planned cleanup stage"
    );

    rules
}

/// Manual cleanup instructions for `rules`, in `ManualCleanupSortOrder`.
///
/// Containers are stopped before the containers they depend on.
pub fn manual_cleanup_commands(rules: &[CleanupStepRule]) -> Vec<String> {
    let mut sorted: Vec<&CleanupStepRule> = rules.iter().collect();
    sorted.sort_by_key(|r| r.manual_cleanup_sort_order());
    let (stops, rest): (Vec<_>, Vec<_>) = sorted.into_iter().partition(|r| r.is_stop());

    stops_dependents_first(stops)
        .into_iter()
        .chain(rest)
        .map(|r| r.manual_cleanup_command())
        .collect()
}

/// Reorder stop rules so each comes after the stops it must wait for,
/// keeping the given order otherwise.
fn stops_dependents_first(mut remaining: Vec<&CleanupStepRule>) -> Vec<&CleanupStepRule> {
    let mut ordered = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let waiting: BTreeSet<&ContainerName> = remaining
            .iter()
            .filter_map(|r| match r {
                CleanupStepRule::StopContainer { container, .. } => Some(container),
                _ => None,
            })
            .collect();

        let next = remaining
            .iter()
            .position(|r| match r {
                CleanupStepRule::StopContainer {
                    must_be_stopped_first,
                    ..
                } => must_be_stopped_first.iter().all(|c| !waiting.contains(c)),
                _ => true,
            })
            .unwrap_or(0);

        ordered.push(remaining.remove(next));
    }

    ordered
}
