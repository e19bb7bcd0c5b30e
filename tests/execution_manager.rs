// tests/execution_manager.rs

mod common;
use crate::common::*;

use std::sync::{Arc, Mutex};

use taskbox::engine::execution_manager::ParallelExecutionManager;
use taskbox::engine::events::TaskEvent;
use taskbox::engine::state_machine::{FAILED_EXIT_CODE, StateMachineOptions, TaskOutcome};
use taskbox::engine::steps::{TaskStep, TaskStepKind};
use taskbox::exec::CancellationContext;
use taskbox::exec::step_runner::{StepFuture, StepRunner, TaskEventSink};

/// Answers every step with its success events and records what it ran.
/// Optionally requests cancellation as soon as the first step starts.
struct ScriptedRunner {
    cancel_on_first_step: Option<CancellationContext>,
    ran: Mutex<Vec<TaskStep>>,
}

impl ScriptedRunner {
    fn new(cancel_on_first_step: Option<CancellationContext>) -> Self {
        Self {
            cancel_on_first_step,
            ran: Mutex::new(Vec::new()),
        }
    }

    fn ran_of_kind(&self, kind: TaskStepKind) -> usize {
        self.ran
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.kind() == kind)
            .count()
    }
}

impl StepRunner for ScriptedRunner {
    fn run(&self, step: TaskStep, events: TaskEventSink) -> StepFuture<'_> {
        Box::pin(async move {
            if let Some(cancellation) = &self.cancel_on_first_step {
                cancellation.cancel();
            }
            self.ran.lock().unwrap().push(step.clone());

            let mut answers = success_events(&step);
            let terminal = answers.pop().expect("every step has a terminal event");
            for event in answers {
                events.post(event);
            }
            terminal
        })
    }
}

#[tokio::test]
async fn abort_at_the_parallelism_cap_leaves_no_step_unexecuted() {
    init_tracing();
    let cancellation = CancellationContext::new();
    let runner = Arc::new(ScriptedRunner::new(Some(cancellation.clone())));
    let manager = ParallelExecutionManager::new(runner.clone(), Vec::new(), cancellation, 1);
    let mut machine = machine_for(&shop_config(), "test", StateMachineOptions::default());

    with_timeout(manager.run(&mut machine)).await.unwrap();

    assert_eq!(machine.outcome(), TaskOutcome::Interrupted);
    assert_eq!(machine.exit_code(), FAILED_EXIT_CODE);
    for kind in [
        TaskStepKind::CreateTaskNetwork,
        TaskStepKind::BuildImage,
        TaskStepKind::PullImage,
        TaskStepKind::DeleteTaskNetwork,
    ] {
        assert_eq!(
            machine.processed_steps_of_kind(kind).len(),
            runner.ran_of_kind(kind),
            "{kind:?} handed out but never run"
        );
    }

    let started = machine
        .events()
        .iter()
        .filter(|e| matches!(e, TaskEvent::StepStarting { .. }))
        .count();
    assert_eq!(started, runner.ran.lock().unwrap().len());
}

#[tokio::test]
async fn a_cap_of_one_still_runs_every_step() {
    init_tracing();
    let runner = Arc::new(ScriptedRunner::new(None));
    let manager =
        ParallelExecutionManager::new(runner.clone(), Vec::new(), CancellationContext::new(), 1);
    let mut machine = machine_for(&shop_config(), "test", StateMachineOptions::default());

    with_timeout(manager.run(&mut machine)).await.unwrap();

    assert_eq!(machine.exit_code(), 0);
    assert_eq!(runner.ran_of_kind(TaskStepKind::PullImage), 2);
    assert_eq!(runner.ran_of_kind(TaskStepKind::RemoveContainer), 3);
    assert!(machine.events().container_removed("db"));
}
