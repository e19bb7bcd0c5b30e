// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{Configuration, Container, ContainerName, Task, TaskRunConfiguration};
use crate::dag::order::suggest_task_names;
use crate::errors::GraphError;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct ContainerNode {
    container: Container,
    /// Containers that must be ready before this one starts.
    dependencies: BTreeSet<ContainerName>,
    /// Containers that list this one as a dependency.
    dependents: BTreeSet<ContainerName>,
}

/// The containers taking part in a single task, keyed by name.
///
/// The node set is exactly the main container plus everything reachable
/// from it through "depends on" edges. Acyclicity and name resolution are
/// checked in [`ContainerDependencyGraph::resolve`]; once built, the graph is
/// read-only.
#[derive(Debug, Clone)]
pub struct ContainerDependencyGraph {
    task: Task,
    run: TaskRunConfiguration,
    nodes: BTreeMap<ContainerName, ContainerNode>,
}

impl ContainerDependencyGraph {
    /// Resolve the graph for `task_name`.
    pub fn resolve(config: &Configuration, task_name: &str) -> Result<Self, GraphError> {
        let task = config
            .task(task_name)
            .ok_or_else(|| GraphError::UnknownTask {
                task: task_name.to_string(),
                suggestions: suggest_task_names(config, task_name),
            })?;
        Self::for_task(config, task)
    }

    /// Resolve the graph for an already looked-up task.
    pub fn for_task(config: &Configuration, task: &Task) -> Result<Self, GraphError> {
        let run = task
            .run
            .clone()
            .ok_or_else(|| GraphError::TaskHasNoContainer(task.name.clone()))?;

        if task.dependencies.contains(&run.container) {
            return Err(GraphError::MainContainerIsDependency {
                task: task.name.clone(),
                container: run.container.clone(),
            });
        }

        let mut builder = GraphBuilder {
            config,
            task,
            nodes: BTreeMap::new(),
        };

        let task_description = format!("task '{}'", task.name);
        let main = builder.find_container(&run.container, &task_description)?;

        let mut main_dependencies = BTreeSet::new();
        for name in task.dependencies.iter() {
            builder.find_container(name, &task_description)?;
            main_dependencies.insert(name.clone());
        }
        let main_description = format!("container '{}'", main.name);
        for name in main.dependencies.iter() {
            builder.find_container(name, &main_description)?;
            main_dependencies.insert(name.clone());
        }

        builder.get_or_create_node(main, main_dependencies, &[])?;

        let mut nodes = builder.nodes;
        let edges: Vec<(ContainerName, ContainerName)> = nodes
            .iter()
            .flat_map(|(name, node)| {
                node.dependencies
                    .iter()
                    .map(move |dep| (dep.clone(), name.clone()))
            })
            .collect();
        for (dep, dependent) in edges {
            if let Some(node) = nodes.get_mut(&dep) {
                node.dependents.insert(dependent);
            }
        }

        Ok(Self {
            task: task.clone(),
            run,
            nodes,
        })
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn run_configuration(&self) -> &TaskRunConfiguration {
        &self.run
    }

    pub fn main_container_name(&self) -> &str {
        &self.run.container
    }

    pub fn main_container(&self) -> &Container {
        // The main node is always inserted by `for_task`.
        &self.nodes[&self.run.container].container
    }

    pub fn is_main(&self, name: &str) -> bool {
        self.run.container == name
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn container(&self, name: &str) -> Option<&Container> {
        self.nodes.get(name).map(|n| &n.container)
    }

    /// All containers in the graph, ordered by name.
    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.nodes.values().map(|n| &n.container)
    }

    pub fn container_names(&self) -> BTreeSet<ContainerName> {
        self.nodes.keys().cloned().collect()
    }

    /// Immediate dependencies of a container. For the main container this
    /// includes the task-level dependencies.
    pub fn dependencies_of(&self, name: &str) -> &BTreeSet<ContainerName> {
        static EMPTY: BTreeSet<ContainerName> = BTreeSet::new();
        self.nodes.get(name).map(|n| &n.dependencies).unwrap_or(&EMPTY)
    }

    /// Immediate dependents of a container.
    pub fn dependents_of(&self, name: &str) -> &BTreeSet<ContainerName> {
        static EMPTY: BTreeSet<ContainerName> = BTreeSet::new();
        self.nodes.get(name).map(|n| &n.dependents).unwrap_or(&EMPTY)
    }

    /// A startup order where every container follows its dependencies.
    pub fn startup_order(&self) -> Vec<&str> {
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in self.nodes.keys() {
            graph.add_node(name.as_str());
        }
        for (name, node) in self.nodes.iter() {
            for dep in node.dependencies.iter() {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }

        // Cycles were rejected during resolution.
        toposort(&graph, None).unwrap_or_default()
    }
}

struct GraphBuilder<'a> {
    config: &'a Configuration,
    task: &'a Task,
    nodes: BTreeMap<ContainerName, ContainerNode>,
}

impl<'a> GraphBuilder<'a> {
    fn find_container(
        &self,
        name: &str,
        referenced_by: &str,
    ) -> Result<&'a Container, GraphError> {
        self.config
            .container(name)
            .ok_or_else(|| GraphError::UnknownContainer {
                name: name.to_string(),
                referenced_by: referenced_by.to_string(),
            })
    }

    fn get_or_create_node(
        &mut self,
        container: &'a Container,
        dependencies: BTreeSet<ContainerName>,
        path: &[&'a Container],
    ) -> Result<(), GraphError> {
        if self.nodes.contains_key(&container.name) {
            return Ok(());
        }

        if dependencies.contains(&container.name) {
            return Err(GraphError::SelfDependency(container.name.clone()));
        }

        let mut new_path = path.to_vec();
        new_path.push(container);

        if path.iter().any(|c| c.name == container.name) {
            return Err(self.dependency_cycle(&new_path));
        }

        for name in dependencies.iter() {
            let dependency = self.find_container(name, &format!("container '{}'", container.name))?;
            let description = format!("container '{}'", dependency.name);
            for transitive in dependency.dependencies.iter() {
                self.find_container(transitive, &description)?;
            }
            self.get_or_create_node(dependency, dependency.dependencies.clone(), &new_path)?;
        }

        self.nodes.insert(
            container.name.clone(),
            ContainerNode {
                container: container.clone(),
                dependencies,
                dependents: BTreeSet::new(),
            },
        );

        Ok(())
    }

    fn dependency_cycle(&self, path: &[&Container]) -> GraphError {
        let names: Vec<String> = path.iter().map(|c| c.name.clone()).collect();
        let due_to_task_dependency = names
            .get(1)
            .is_some_and(|n| self.task.dependencies.contains(n));

        let description = if due_to_task_dependency {
            self.describe_task_dependency_cycle(&names)
        } else {
            describe_container_dependency_cycle(&names)
        };

        GraphError::DependencyCycle {
            task: self.task.name.clone(),
            description,
            path: names,
        }
    }

    fn describe_task_dependency_cycle(&self, path: &[String]) -> String {
        let quoted: Vec<String> = path.iter().skip(1).map(|n| format!("'{n}'")).collect();
        let main = self.task.run.as_ref().map(|r| r.container.as_str());

        let first = format!(
            "Container {} (which is explicitly started by the task)",
            quoted[0]
        );
        let last = match (path.last(), quoted.last()) {
            (Some(name), Some(q)) if Some(name.as_str()) == main => {
                format!("the task container {q}")
            }
            (_, Some(q)) => q.clone(),
            _ => String::new(),
        };

        let middle = &quoted[1..quoted.len() - 1];
        let outgoing = std::iter::once(first).chain(middle.iter().cloned());
        let incoming = middle.iter().cloned().chain(std::iter::once(last));

        let parts: Vec<String> = outgoing
            .zip(incoming)
            .map(|(from, to)| format!("{from} depends on {to}"))
            .collect();

        format!("{}.", parts.join(", and "))
    }
}

fn describe_container_dependency_cycle(path: &[String]) -> String {
    let quoted: Vec<String> = path.iter().map(|n| format!("'{n}'")).collect();
    format!(
        "Container {} depends on {}.",
        quoted[0],
        quoted[1..].join(", which depends on ")
    )
}
