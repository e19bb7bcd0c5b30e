// src/engine/state_machine.rs

//! Pure task state machine.
//!
//! Owns the pending step queue, the processed steps, the event log and the
//! run/cleanup status of one task. It has no channels and performs no IO;
//! the async shell in [`crate::engine::execution_manager`] feeds it events
//! and asks it for the next step.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::dag::ContainerDependencyGraph;
use crate::engine::events::{EventLog, TaskEvent, TaskEventKind};
use crate::engine::stages::{CleanupStage, RunStage, RunStagePlanOptions};
use crate::engine::steps::{TaskStep, TaskStepKind};
use crate::errors::EngineError;
use crate::types::CleanupOption;

/// Exit code reported when the task did not run to completion.
pub const FAILED_EXIT_CODE: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Planning,
    Running,
    Succeeded,
    Failed,
    Aborted,
    CleaningUp,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    Ready(TaskStep),
    /// Nothing can run now, but in-flight steps may unblock more.
    NoStepsReady,
    /// Both stages are finished.
    NoStepsRemaining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualCleanupReason {
    CleanupDisabledAfterFailure,
    CleanupDisabledAfterSuccess,
    CleanupFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ManualCleanup {
    #[default]
    NotRequired,
    Required {
        reason: ManualCleanupReason,
        commands: Vec<String>,
    },
}

/// How the run stage ended, as seen by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { exit_code: i64 },
    Failed { message: String },
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateMachineOptions {
    pub cleanup_after_success: CleanupOption,
    pub cleanup_after_failure: CleanupOption,
}

#[derive(Debug)]
pub struct TaskStateMachine {
    graph: ContainerDependencyGraph,
    options: StateMachineOptions,
    run_stage: RunStage,
    cleanup_stage: Option<CleanupStage>,
    pending: VecDeque<TaskStep>,
    processed: Vec<TaskStep>,
    events: EventLog,
    status: TaskStatus,
    aborted: bool,
    first_failure: Option<String>,
    supplementary_failures: Vec<String>,
    failed_during_cleanup: bool,
    manual_cleanup: ManualCleanup,
    main_exit_code: Option<i64>,
}

impl TaskStateMachine {
    pub fn new(
        graph: ContainerDependencyGraph,
        plan_options: &RunStagePlanOptions,
        options: StateMachineOptions,
    ) -> Self {
        let mut machine = Self {
            run_stage: RunStage::new(Vec::new()),
            graph,
            options,
            cleanup_stage: None,
            pending: VecDeque::new(),
            processed: Vec::new(),
            events: EventLog::new(),
            status: TaskStatus::Planning,
            aborted: false,
            first_failure: None,
            supplementary_failures: Vec::new(),
            failed_during_cleanup: false,
            manual_cleanup: ManualCleanup::NotRequired,
            main_exit_code: None,
        };

        machine.run_stage = RunStage::plan(&machine.graph, plan_options);
        machine.status = TaskStatus::Running;
        machine.queue_ready_steps();
        machine
    }

    pub fn graph(&self) -> &ContainerDependencyGraph {
        &self.graph
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn run_stage(&self) -> &RunStage {
        &self.run_stage
    }

    pub fn cleanup_stage(&self) -> Option<&CleanupStage> {
        self.cleanup_stage.as_ref()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// The failure that ended the run stage, if any.
    pub fn first_failure(&self) -> Option<&str> {
        self.first_failure.as_deref()
    }

    /// Failures after the first one, including every cleanup failure.
    pub fn supplementary_failures(&self) -> &[String] {
        &self.supplementary_failures
    }

    pub fn failed_during_cleanup(&self) -> bool {
        self.failed_during_cleanup
    }

    pub fn manual_cleanup(&self) -> &ManualCleanup {
        &self.manual_cleanup
    }

    /// Append a step to the pending queue. Duplicates are allowed.
    pub fn queue_step(&mut self, step: TaskStep) {
        debug!(%step, "queued step");
        self.pending.push_back(step);
    }

    /// Dequeue the next step, moving it to the processed list.
    ///
    /// `steps_still_running` tells the machine whether a stage may still make
    /// progress once in-flight steps post their events. Stage transitions
    /// only happen when nothing is in flight.
    pub fn pop_next_step(&mut self, steps_still_running: bool) -> Result<NextStep, EngineError> {
        if self.cleanup_stage.is_none() {
            match self.status {
                TaskStatus::Planning | TaskStatus::Running => {
                    self.queue_ready_steps();
                    if let Some(step) = self.take_pending() {
                        return Ok(NextStep::Ready(step));
                    }
                    if steps_still_running {
                        return Ok(NextStep::NoStepsReady);
                    }
                    if !self.run_stage.is_complete() {
                        return Err(EngineError::NoStepsReady);
                    }
                    self.status = TaskStatus::Succeeded;
                }
                _ => {
                    if !self.pending.is_empty() {
                        debug!(
                            dropped = self.pending.len(),
                            "run stage stopped; dropping queued steps"
                        );
                        self.pending.clear();
                    }
                    if steps_still_running {
                        return Ok(NextStep::NoStepsReady);
                    }
                }
            }

            self.begin_cleanup();
        }

        if self.status == TaskStatus::Done {
            return Ok(NextStep::NoStepsRemaining);
        }

        self.queue_ready_steps();
        if let Some(step) = self.take_pending() {
            return Ok(NextStep::Ready(step));
        }
        if steps_still_running {
            return Ok(NextStep::NoStepsReady);
        }

        self.finish_cleanup();
        Ok(NextStep::NoStepsRemaining)
    }

    /// The step [`pop_next_step`](Self::pop_next_step) would hand out next,
    /// left in the queue.
    pub fn peek_next_step(&mut self) -> Option<&TaskStep> {
        if self.cleanup_stage.is_none() && self.status != TaskStatus::Running {
            return None;
        }
        self.queue_ready_steps();
        self.pending.front()
    }

    /// Record an event, then re-evaluate the current stage.
    pub fn post_event(&mut self, event: TaskEvent) {
        self.events.push(event.clone());

        if event.is_informational() {
            return;
        }

        match &event {
            TaskEvent::RunningContainerExited {
                container,
                exit_code,
            } if self.graph.is_main(container) => {
                self.main_exit_code = Some(*exit_code);
            }
            TaskEvent::UserInterruptedExecution => {
                if self.status == TaskStatus::Running {
                    self.status = TaskStatus::Aborted;
                }
            }
            _ => {}
        }

        if let Some(message) = event.failure_message() {
            if self.cleanup_stage.is_some() {
                warn!(failure = %message, "cleanup step failed");
                self.failed_during_cleanup = true;
                self.supplementary_failures.push(message);
            } else if self.status == TaskStatus::Running {
                info!(failure = %message, "run stage failed; no further run steps will start");
                self.status = TaskStatus::Failed;
                self.first_failure = Some(message);
            } else {
                self.supplementary_failures.push(message);
            }
        }

        self.queue_ready_steps();
    }

    /// Stop issuing run-stage steps. In-flight steps are left to finish.
    pub fn abort(&mut self) {
        if self.aborted {
            return;
        }
        if self.cleanup_stage.is_some() {
            info!("interrupt received during cleanup; cleanup continues");
            return;
        }

        self.aborted = true;
        self.post_event(TaskEvent::UserInterruptedExecution);
    }

    pub fn pending_and_processed_steps_of_kind(&self, kind: TaskStepKind) -> Vec<&TaskStep> {
        self.pending
            .iter()
            .chain(self.processed.iter())
            .filter(|s| s.kind() == kind)
            .collect()
    }

    pub fn processed_steps_of_kind(&self, kind: TaskStepKind) -> Vec<&TaskStep> {
        self.processed.iter().filter(|s| s.kind() == kind).collect()
    }

    pub fn past_events_of_kind(&self, kind: TaskEventKind) -> Vec<&TaskEvent> {
        self.events.of_kind(kind).collect()
    }

    /// The only event of `kind`, or `None`. More than one is an invariant
    /// violation.
    pub fn single_past_event_of_kind(
        &self,
        kind: TaskEventKind,
    ) -> Result<Option<&TaskEvent>, EngineError> {
        let matching = self.past_events_of_kind(kind);
        match matching.len() {
            0 => Ok(None),
            1 => Ok(matching.first().copied()),
            count => Err(EngineError::MultipleEvents { kind, count }),
        }
    }

    pub fn outcome(&self) -> TaskOutcome {
        if let Some(message) = &self.first_failure {
            return TaskOutcome::Failed {
                message: message.clone(),
            };
        }
        if self.aborted {
            return TaskOutcome::Interrupted;
        }
        TaskOutcome::Succeeded {
            exit_code: self.main_exit_code.unwrap_or(FAILED_EXIT_CODE),
        }
    }

    /// The main container's exit code when the task ran to completion and
    /// cleaned up, [`FAILED_EXIT_CODE`] otherwise.
    pub fn exit_code(&self) -> i64 {
        if self.failed_during_cleanup {
            return FAILED_EXIT_CODE;
        }
        match self.outcome() {
            TaskOutcome::Succeeded { exit_code } => exit_code,
            TaskOutcome::Failed { .. } | TaskOutcome::Interrupted => FAILED_EXIT_CODE,
        }
    }

    fn take_pending(&mut self) -> Option<TaskStep> {
        let step = self.pending.pop_front()?;
        self.processed.push(step.clone());
        Some(step)
    }

    fn queue_ready_steps(&mut self) {
        let steps = match (&mut self.cleanup_stage, self.status) {
            (None, TaskStatus::Running) => self.run_stage.take_ready_steps(&self.events),
            (Some(stage), TaskStatus::CleaningUp) => {
                stage.refresh(&self.graph, &self.events);
                stage.take_ready_steps(&self.events)
            }
            _ => return,
        };

        for step in steps {
            self.queue_step(step);
        }
    }

    fn begin_cleanup(&mut self) {
        let run_failed = self.status != TaskStatus::Succeeded;
        let option = if run_failed {
            self.options.cleanup_after_failure
        } else {
            self.options.cleanup_after_success
        };
        let containers_created = self.events.created_containers().next().is_some();

        info!(
            task = %self.graph.task().name,
            run_failed,
            ?option,
            "starting cleanup stage"
        );

        if run_failed && option == CleanupOption::DontCleanup && containers_created {
            let stage = CleanupStage::create(&self.graph, &self.events, CleanupOption::DontCleanup);
            self.manual_cleanup = ManualCleanup::Required {
                reason: ManualCleanupReason::CleanupDisabledAfterFailure,
                commands: stage.manual_cleanup_commands().to_vec(),
            };
            self.cleanup_stage = Some(stage);
            self.status = TaskStatus::Done;
            return;
        }

        let option = if containers_created {
            option
        } else {
            CleanupOption::Cleanup
        };
        let stage = CleanupStage::create(&self.graph, &self.events, option);

        if option == CleanupOption::DontCleanup {
            let commands = stage.skipped_cleanup_commands();
            if !commands.is_empty() {
                self.manual_cleanup = ManualCleanup::Required {
                    reason: ManualCleanupReason::CleanupDisabledAfterSuccess,
                    commands,
                };
            }
        }

        self.cleanup_stage = Some(stage);
        self.status = TaskStatus::CleaningUp;
    }

    fn finish_cleanup(&mut self) {
        self.status = TaskStatus::Done;

        let Some(stage) = &self.cleanup_stage else {
            return;
        };

        if self.failed_during_cleanup || !stage.is_complete() {
            self.manual_cleanup = ManualCleanup::Required {
                reason: ManualCleanupReason::CleanupFailed,
                commands: stage.manual_cleanup_commands().to_vec(),
            };
        }

        info!(
            task = %self.graph.task().name,
            failed_during_cleanup = self.failed_during_cleanup,
            "cleanup stage finished"
        );
    }
}
