// tests/state_machine.rs

mod common;
use crate::common::*;

use std::path::PathBuf;

use taskbox::config::model::ImageSource;
use taskbox::engine::events::{TaskEvent, TaskEventKind};
use taskbox::engine::state_machine::{
    FAILED_EXIT_CODE, ManualCleanup, ManualCleanupReason, NextStep, StateMachineOptions,
    TaskOutcome, TaskStatus,
};
use taskbox::engine::steps::{TaskStep, TaskStepKind};
use taskbox::errors::EngineError;
use taskbox::types::CleanupOption;

fn is_stop(step: &TaskStep, name: &str) -> bool {
    matches!(step, TaskStep::StopContainer { container, .. } if container == name)
}

fn is_remove(step: &TaskStep, name: &str) -> bool {
    matches!(step, TaskStep::RemoveContainer { container, .. } if container == name)
}

#[test]
fn successful_task_runs_every_step_then_cleans_up() {
    init_tracing();
    let config = shop_config();
    let mut machine = machine_for(&config, "test", StateMachineOptions::default());

    let steps = drive(&mut machine, success_events);

    assert_eq!(machine.status(), TaskStatus::Done);
    assert_eq!(machine.outcome(), TaskOutcome::Succeeded { exit_code: 0 });
    assert_eq!(machine.exit_code(), 0);
    assert_eq!(machine.manual_cleanup(), &ManualCleanup::NotRequired);

    let start_db = index_of(&steps, |s| {
        matches!(s, TaskStep::StartContainer { container, .. } if container == "db")
    });
    let setup_db = index_of(&steps, |s| {
        matches!(s, TaskStep::RunContainerSetupCommands { container, .. } if container.name == "db")
    });
    let run_app = index_of(&steps, |s| matches!(s, TaskStep::RunContainer { .. }));
    assert!(start_db < setup_db && setup_db < run_app);

    // app depends on db, so it stops first; the network goes last.
    assert!(index_of(&steps, |s| is_stop(s, "app")) < index_of(&steps, |s| is_stop(s, "db")));
    assert!(index_of(&steps, |s| is_stop(s, "db")) < index_of(&steps, |s| is_remove(s, "db")));
    assert!(matches!(steps.last(), Some(TaskStep::DeleteTaskNetwork { .. })));

    assert_eq!(machine.processed_steps_of_kind(TaskStepKind::RemoveContainer).len(), 3);
}

#[test]
fn the_main_container_is_never_started_separately() {
    let config = shop_config();
    let mut machine = machine_for(&config, "test", StateMachineOptions::default());

    drive(&mut machine, success_events);

    let started: Vec<String> = machine
        .processed_steps_of_kind(TaskStepKind::StartContainer)
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(started.len(), 2);
    assert!(started.iter().all(|s| !s.contains("'app'")), "{started:?}");
}

#[test]
fn main_container_exit_code_becomes_the_task_exit_code() {
    let config = shop_config();
    let mut machine = machine_for(&config, "lint", StateMachineOptions::default());

    drive(&mut machine, |step| match step {
        TaskStep::RunContainer { container, .. } => vec![
            TaskEvent::ContainerStarted {
                container: container.clone(),
            },
            TaskEvent::RunningContainerExited {
                container: container.clone(),
                exit_code: 3,
            },
        ],
        other => success_events(other),
    });

    assert_eq!(machine.outcome(), TaskOutcome::Succeeded { exit_code: 3 });
    assert_eq!(machine.exit_code(), 3);
}

#[test]
fn failed_pull_stops_the_run_stage_and_cleans_up_what_exists() {
    let config = shop_config();
    let mut machine = machine_for(&config, "test", StateMachineOptions::default());

    let steps = drive(&mut machine, |step| match step {
        TaskStep::PullImage { source } if source.to_string() == "postgres:16" => {
            vec![TaskEvent::ImagePullFailed {
                source: source.clone(),
                message: "manifest unknown".to_string(),
            }]
        }
        other => success_events(other),
    });

    assert_eq!(
        machine.outcome(),
        TaskOutcome::Failed {
            message: "Could not pull image 'postgres:16': manifest unknown".to_string()
        }
    );
    assert_eq!(machine.exit_code(), FAILED_EXIT_CODE);
    assert!(steps.iter().all(|s| !matches!(s, TaskStep::RunContainer { .. })));

    // Whatever was created before the failure is removed again.
    for (name, _) in machine.events().created_containers() {
        assert!(machine.events().container_removed(name), "{name} was not removed");
    }
    assert!(machine.events().contains_kind(TaskEventKind::TaskNetworkDeleted));
    assert_eq!(machine.manual_cleanup(), &ManualCleanup::NotRequired);
}

#[test]
fn failure_without_cleanup_leaves_containers_and_lists_commands() {
    let config = shop_config();
    let mut machine = machine_for(
        &config,
        "test",
        StateMachineOptions {
            cleanup_after_success: CleanupOption::Cleanup,
            cleanup_after_failure: CleanupOption::DontCleanup,
        },
    );

    let steps = drive(&mut machine, |step| match step {
        TaskStep::WaitForContainerToBecomeHealthy { container, .. } if container == "db" => {
            vec![TaskEvent::ContainerDidNotBecomeHealthy {
                container: container.clone(),
                message: "timed out".to_string(),
            }]
        }
        other => success_events(other),
    });

    assert!(steps.iter().all(|s| !matches!(
        s,
        TaskStep::StopContainer { .. } | TaskStep::RemoveContainer { .. } | TaskStep::DeleteTaskNetwork { .. }
    )));

    let ManualCleanup::Required { reason, commands } = machine.manual_cleanup() else {
        panic!("expected manual cleanup instructions");
    };
    assert_eq!(*reason, ManualCleanupReason::CleanupDisabledAfterFailure);
    assert!(commands[0].starts_with("docker stop "));
    assert!(commands.contains(&"docker stop db-id".to_string()));
    assert!(commands.contains(&"docker rm --force --volumes db-id".to_string()));
    let last_stop = commands.iter().rposition(|c| c.starts_with("docker stop ")).unwrap();
    let first_rm = commands.iter().position(|c| c.starts_with("docker rm ")).unwrap();
    assert!(last_stop < first_rm);
    assert_eq!(commands.last().map(String::as_str), Some("docker network rm shop-net"));
    assert_eq!(machine.exit_code(), FAILED_EXIT_CODE);
}

#[test]
fn success_without_cleanup_stops_containers_but_keeps_them() {
    let config = shop_config();
    let mut machine = machine_for(
        &config,
        "lint",
        StateMachineOptions {
            cleanup_after_success: CleanupOption::DontCleanup,
            cleanup_after_failure: CleanupOption::Cleanup,
        },
    );

    let steps = drive(&mut machine, success_events);

    assert!(steps.iter().any(|s| is_stop(s, "app")));
    assert!(steps.iter().any(|s| is_stop(s, "db")));
    assert!(!steps.iter().any(|s| matches!(s, TaskStep::RemoveContainer { .. })));

    let ManualCleanup::Required { reason, commands } = machine.manual_cleanup() else {
        panic!("expected manual cleanup instructions");
    };
    assert_eq!(*reason, ManualCleanupReason::CleanupDisabledAfterSuccess);
    assert!(commands.iter().all(|c| !c.starts_with("docker stop")));
    assert!(commands.contains(&"docker rm --force --volumes app-id".to_string()));
    assert_eq!(machine.exit_code(), 0);
}

#[test]
fn interrupt_before_any_step_finishes_skips_straight_to_done() {
    let config = shop_config();
    let mut machine = machine_for(&config, "test", StateMachineOptions::default());

    machine.abort();
    machine.abort();

    assert_eq!(machine.status(), TaskStatus::Aborted);
    assert_eq!(
        machine.past_events_of_kind(TaskEventKind::UserInterruptedExecution).len(),
        1
    );

    let steps = drive(&mut machine, success_events);
    assert!(steps.is_empty(), "{:?}", step_names(&steps));
    assert_eq!(machine.outcome(), TaskOutcome::Interrupted);
    assert_eq!(machine.exit_code(), FAILED_EXIT_CODE);
}

#[test]
fn interrupt_during_cleanup_is_ignored() {
    let config = shop_config();
    let mut machine = machine_for(&config, "lint", StateMachineOptions::default());

    loop {
        match machine.pop_next_step(false).expect("a step is always ready") {
            NextStep::Ready(step) => {
                if matches!(step, TaskStep::StopContainer { .. }) {
                    machine.abort();
                }
                for event in success_events(&step) {
                    machine.post_event(event);
                }
            }
            NextStep::NoStepsReady => panic!("nothing is in flight"),
            NextStep::NoStepsRemaining => break,
        }
    }

    assert!(!machine.is_aborted());
    assert!(!machine.events().contains_kind(TaskEventKind::UserInterruptedExecution));
    assert!(machine.events().contains_kind(TaskEventKind::TaskNetworkDeleted));
    assert_eq!(machine.exit_code(), 0);
}

#[test]
fn cleanup_failure_fails_the_task_and_asks_for_manual_cleanup() {
    let config = shop_config();
    let mut machine = machine_for(&config, "lint", StateMachineOptions::default());

    drive(&mut machine, |step| match step {
        TaskStep::RemoveContainer { container, .. } if container == "db" => {
            vec![TaskEvent::ContainerRemovalFailed {
                container: container.clone(),
                message: "device busy".to_string(),
            }]
        }
        other => success_events(other),
    });

    assert!(machine.failed_during_cleanup());
    assert_eq!(machine.outcome(), TaskOutcome::Succeeded { exit_code: 0 });
    assert_eq!(machine.exit_code(), FAILED_EXIT_CODE);
    assert_eq!(machine.supplementary_failures().len(), 1);
    assert!(!machine.events().contains_kind(TaskEventKind::TaskNetworkDeleted));

    let ManualCleanup::Required { reason, commands } = machine.manual_cleanup() else {
        panic!("expected manual cleanup instructions");
    };
    assert_eq!(*reason, ManualCleanupReason::CleanupFailed);
    assert!(commands.contains(&"docker network rm shop-net".to_string()));
}

#[test]
fn temporary_files_are_deleted_after_their_container_is_removed() {
    let config = shop_config();
    let mut machine = machine_for(&config, "lint", StateMachineOptions::default());
    let passwd = PathBuf::from("/tmp/taskbox-app-passwd-1");

    let steps = drive(&mut machine, |step| match step {
        TaskStep::CreateContainer { container, .. } if container.name == "app" => {
            let mut events = vec![TaskEvent::TemporaryFileCreated {
                container: Some("app".to_string()),
                path: passwd.clone(),
            }];
            events.extend(success_events(step));
            events
        }
        other => success_events(other),
    });

    let removed = index_of(&steps, |s| is_remove(s, "app"));
    let deleted = index_of(&steps, |s| {
        matches!(s, TaskStep::DeleteTemporaryFile { path } if *path == passwd)
    });
    assert!(removed < deleted);
}

#[test]
fn builds_and_pulls_are_shared_between_containers_with_the_same_source() {
    let config = ConfigurationBuilder::new("shop")
        .with_container(ContainerBuilder::new("a").image("alpine:3").build())
        .with_container(ContainerBuilder::new("b").image("alpine:3").build())
        .with_container(ContainerBuilder::new("main").image("alpine:3").depends_on("a").depends_on("b").build())
        .with_task(TaskBuilder::new("t").runs("main").build())
        .build();
    let mut machine = machine_for(&config, "t", StateMachineOptions::default());

    drive(&mut machine, success_events);

    let pulls = machine.processed_steps_of_kind(TaskStepKind::PullImage);
    assert_eq!(pulls.len(), 1);
    assert_eq!(
        pulls[0],
        &TaskStep::PullImage {
            source: ImageSource::Pull {
                image: "alpine:3".to_string()
            }
        }
    );
}

#[test]
fn queued_steps_count_as_pending_until_popped() {
    let mut machine = machine_for(&shop_config(), "test", StateMachineOptions::default());

    assert_eq!(machine.pending_and_processed_steps_of_kind(TaskStepKind::CreateTaskNetwork).len(), 1);
    assert!(machine.processed_steps_of_kind(TaskStepKind::CreateTaskNetwork).is_empty());

    while let Ok(NextStep::Ready(step)) = machine.pop_next_step(true) {
        if step == TaskStep::CreateTaskNetwork {
            break;
        }
    }

    assert_eq!(machine.pending_and_processed_steps_of_kind(TaskStepKind::CreateTaskNetwork).len(), 1);
    assert_eq!(machine.processed_steps_of_kind(TaskStepKind::CreateTaskNetwork).len(), 1);
}

#[test]
fn additional_arguments_only_reach_the_main_container() {
    let config = shop_config();
    let mut machine = machine_with_arguments(
        &config,
        "test",
        StateMachineOptions::default(),
        vec!["--verbose".to_string()],
    );

    drive(&mut machine, success_events);

    for step in machine.processed_steps_of_kind(TaskStepKind::CreateContainer) {
        let TaskStep::CreateContainer { container, config, .. } = step else {
            unreachable!();
        };
        if container.name == "app" {
            assert_eq!(config.additional_arguments, ["--verbose"]);
        } else {
            assert!(config.additional_arguments.is_empty());
        }
    }
}

#[test]
fn single_event_lookup_rejects_duplicates() {
    let config = shop_config();
    let mut machine = machine_for(&config, "lint", StateMachineOptions::default());

    assert_eq!(
        machine.single_past_event_of_kind(TaskEventKind::TaskNetworkCreated),
        Ok(None)
    );

    machine.post_event(TaskEvent::TaskNetworkCreated { network: network() });
    assert!(matches!(
        machine.single_past_event_of_kind(TaskEventKind::TaskNetworkCreated),
        Ok(Some(TaskEvent::TaskNetworkCreated { .. }))
    ));

    machine.post_event(TaskEvent::TaskNetworkCreated { network: network() });
    assert_eq!(
        machine.single_past_event_of_kind(TaskEventKind::TaskNetworkCreated),
        Err(EngineError::MultipleEvents {
            kind: TaskEventKind::TaskNetworkCreated,
            count: 2
        })
    );
}

#[test]
fn steps_never_become_ready_without_their_events() {
    let config = shop_config();
    let mut machine = machine_for(&config, "lint", StateMachineOptions::default());

    // Hand out everything that is ready up front without answering.
    let mut handed_out = Vec::new();
    while let Ok(NextStep::Ready(step)) = machine.pop_next_step(true) {
        handed_out.push(step);
    }

    assert!(handed_out.iter().all(|s| matches!(
        s,
        TaskStep::CreateTaskNetwork | TaskStep::BuildImage { .. } | TaskStep::PullImage { .. }
    )));
    assert_eq!(machine.pop_next_step(false), Err(EngineError::NoStepsReady));
}
