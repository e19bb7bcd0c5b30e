#![allow(dead_code)]

pub use taskbox_test_utils::builders::{ConfigurationBuilder, ContainerBuilder, TaskBuilder};
pub use taskbox_test_utils::fake_runtime::FakeContainerRuntime;
pub use taskbox_test_utils::{RecordingEventLogger, init_tracing, with_timeout};

use taskbox::config::model::Configuration;
use taskbox::dag::ContainerDependencyGraph;
use taskbox::engine::events::{RuntimeContainer, RuntimeImage, RuntimeNetwork, TaskEvent};
use taskbox::engine::stages::RunStagePlanOptions;
use taskbox::engine::state_machine::{NextStep, StateMachineOptions, TaskStateMachine};
use taskbox::engine::steps::TaskStep;

/// `db` (health checked) and `cache` support `app`, which `test` runs.
///
/// ```text
/// test -> app -> db
///      -> cache
/// ```
pub fn shop_config() -> Configuration {
    ConfigurationBuilder::new("shop")
        .with_container(
            ContainerBuilder::new("db")
                .image("postgres:16")
                .health_check("pg_isready")
                .setup_command("./migrate.sh")
                .build(),
        )
        .with_container(ContainerBuilder::new("cache").image("redis:7").build())
        .with_container(
            ContainerBuilder::new("app")
                .build_directory("/src/app")
                .command("./run-tests.sh")
                .depends_on("db")
                .build(),
        )
        .with_task(
            TaskBuilder::new("test")
                .runs("app")
                .depends_on("cache")
                .group("Test")
                .description("Run the tests")
                .build(),
        )
        .with_task(
            TaskBuilder::new("lint")
                .runs("app")
                .command("./lint.sh")
                .group("Test")
                .build(),
        )
        .with_task(
            TaskBuilder::new("ci")
                .prerequisite("lint")
                .prerequisite("test")
                .build(),
        )
        .build()
}

pub fn machine_for(config: &Configuration, task: &str, options: StateMachineOptions) -> TaskStateMachine {
    machine_with_arguments(config, task, options, Vec::new())
}

pub fn machine_with_arguments(
    config: &Configuration,
    task: &str,
    options: StateMachineOptions,
    additional_arguments: Vec<String>,
) -> TaskStateMachine {
    let graph = ContainerDependencyGraph::resolve(config, task).expect("graph resolves");
    let plan_options = RunStagePlanOptions {
        project_name: config.project_name.clone(),
        additional_arguments,
    };
    TaskStateMachine::new(graph, &plan_options, options)
}

pub fn runtime_container(name: &str) -> RuntimeContainer {
    RuntimeContainer {
        id: format!("{name}-id"),
        name: format!("shop-{name}-abc123"),
    }
}

pub fn network() -> RuntimeNetwork {
    RuntimeNetwork {
        id: "shop-net".to_string(),
    }
}

/// The events a real runner would post when `step` succeeds, in order.
pub fn success_events(step: &TaskStep) -> Vec<TaskEvent> {
    match step {
        TaskStep::InitialiseCaches { .. } => vec![TaskEvent::CachesInitialised],
        TaskStep::CreateTaskNetwork => vec![TaskEvent::TaskNetworkCreated { network: network() }],
        TaskStep::BuildImage { source, .. } => vec![TaskEvent::ImageBuilt {
            source: source.clone(),
            image: RuntimeImage {
                id: "sha256:built".to_string(),
            },
        }],
        TaskStep::PullImage { source } => vec![TaskEvent::ImagePulled {
            source: source.clone(),
            image: RuntimeImage {
                id: format!("sha256:{source}"),
            },
        }],
        TaskStep::CreateContainer { container, .. } => vec![TaskEvent::ContainerCreated {
            container: container.name.clone(),
            runtime: runtime_container(&container.name),
        }],
        TaskStep::StartContainer { container, .. } => vec![TaskEvent::ContainerStarted {
            container: container.clone(),
        }],
        TaskStep::WaitForContainerToBecomeHealthy { container, .. } => {
            vec![TaskEvent::ContainerBecameHealthy {
                container: container.clone(),
            }]
        }
        TaskStep::RunContainerSetupCommands { container, .. } => {
            vec![TaskEvent::ContainerBecameReady {
                container: container.name.clone(),
            }]
        }
        TaskStep::RunContainer { container, .. } => vec![
            TaskEvent::ContainerStarted {
                container: container.clone(),
            },
            TaskEvent::RunningContainerExited {
                container: container.clone(),
                exit_code: 0,
            },
        ],
        TaskStep::StopContainer { container, .. } => vec![TaskEvent::ContainerStopped {
            container: container.clone(),
        }],
        TaskStep::RemoveContainer { container, .. } => vec![TaskEvent::ContainerRemoved {
            container: container.clone(),
        }],
        TaskStep::DeleteTemporaryFile { path } => {
            vec![TaskEvent::TemporaryFileDeleted { path: path.clone() }]
        }
        TaskStep::DeleteTemporaryDirectory { path } => {
            vec![TaskEvent::TemporaryDirectoryDeleted { path: path.clone() }]
        }
        TaskStep::DeleteTaskNetwork { .. } => vec![TaskEvent::TaskNetworkDeleted],
    }
}

/// Run `machine` to completion one step at a time, answering each step with
/// `respond`. Returns the steps in the order they were handed out.
pub fn drive(
    machine: &mut TaskStateMachine,
    mut respond: impl FnMut(&TaskStep) -> Vec<TaskEvent>,
) -> Vec<TaskStep> {
    let mut executed = Vec::new();

    loop {
        match machine.pop_next_step(false).expect("a step is always ready") {
            NextStep::Ready(step) => {
                for event in respond(&step) {
                    machine.post_event(event);
                }
                executed.push(step);
            }
            NextStep::NoStepsReady => panic!("nothing is in flight, so some step must be ready"),
            NextStep::NoStepsRemaining => return executed,
        }
    }
}

pub fn step_names(steps: &[TaskStep]) -> Vec<String> {
    steps.iter().map(|s| s.to_string()).collect()
}

/// Index of the first step matching `predicate`.
pub fn index_of(steps: &[TaskStep], predicate: impl Fn(&TaskStep) -> bool) -> usize {
    steps
        .iter()
        .position(predicate)
        .expect("expected step was executed")
}
