// src/dag/order.rs

//! Ordering of a task and its prerequisite tasks.

use regex::Regex;
use tracing::{info, warn};

use crate::config::model::{Configuration, Task};
use crate::errors::GraphError;

/// Resolve the tasks to run for `task_name`, prerequisites first.
///
/// Prerequisites are visited depth-first in declaration order and every task
/// appears at most once. With `skip_prerequisites` only the task itself is
/// returned.
pub fn resolve_execution_order<'a>(
    config: &'a Configuration,
    task_name: &str,
    skip_prerequisites: bool,
) -> Result<Vec<&'a Task>, GraphError> {
    let task = config
        .task(task_name)
        .ok_or_else(|| GraphError::UnknownTask {
            task: task_name.to_string(),
            suggestions: suggest_task_names(config, task_name),
        })?;

    let order = if skip_prerequisites {
        vec![task]
    } else {
        let mut order = Vec::new();
        visit(config, task, &mut vec![task], &mut order)?;
        order
    };

    info!(
        task = %task_name,
        order = ?order.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        skip_prerequisites,
        "resolved task execution order"
    );

    Ok(order)
}

fn visit<'a>(
    config: &'a Configuration,
    task: &'a Task,
    path: &mut Vec<&'a Task>,
    order: &mut Vec<&'a Task>,
) -> Result<(), GraphError> {
    for name in expand_wildcards(config, &task.prerequisites) {
        let prerequisite =
            config
                .task(&name)
                .ok_or_else(|| GraphError::UnknownPrerequisite {
                    task: task.name.clone(),
                    prerequisite: name.clone(),
                    suggestions: suggest_task_names(config, &name),
                })?;

        if path.iter().any(|t| t.name == prerequisite.name) {
            path.push(prerequisite);
            return Err(GraphError::PrerequisiteCycle(describe_cycle(path)));
        }

        if order.iter().any(|t| t.name == prerequisite.name) {
            continue;
        }

        path.push(prerequisite);
        visit(config, prerequisite, path, order)?;
        path.pop();
    }

    order.push(task);
    Ok(())
}

/// Expand `*` wildcards against all task names (sorted). Names without a
/// wildcard pass through unchanged, even if unknown.
fn expand_wildcards(config: &Configuration, specs: &[String]) -> Vec<String> {
    let mut names = Vec::new();

    for spec in specs {
        if !spec.contains('*') {
            names.push(spec.clone());
            continue;
        }

        let pattern = match wildcard_regex(spec) {
            Ok(p) => p,
            Err(e) => {
                warn!(prerequisite = %spec, error = %e, "invalid prerequisite pattern; ignoring");
                continue;
            }
        };
        // BTreeMap keys are already sorted.
        names.extend(
            config
                .tasks
                .keys()
                .filter(|name| pattern.is_match(name))
                .cloned(),
        );
    }

    names
}

fn wildcard_regex(spec: &str) -> Result<Regex, regex::Error> {
    let escaped: Vec<String> = spec.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*")))
}

/// Largest edit distance at which a task name is offered as a correction.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// Task names close to `unknown`, closest first, ties by name.
pub fn suggest_task_names(config: &Configuration, unknown: &str) -> Vec<String> {
    let mut candidates: Vec<(usize, &String)> = config
        .tasks
        .keys()
        .map(|name| (edit_distance(unknown, name), name))
        .filter(|(distance, _)| *distance <= MAX_SUGGESTION_DISTANCE)
        .collect();
    candidates.sort();
    candidates.into_iter().map(|(_, name)| name.clone()).collect()
}

/// Levenshtein distance over chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

fn describe_cycle(path: &[&Task]) -> String {
    let names: Vec<String> = path.iter().map(|t| format!("'{}'", t.name)).collect();
    let mut description = format!("task {} has {} as a prerequisite", names[0], names[1]);
    for name in names.iter().skip(2) {
        description.push_str(&format!(", which has {name} as a prerequisite"));
    }
    description
}
