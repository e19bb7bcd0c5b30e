// src/engine/execution_manager.rs

//! Async shell around [`TaskStateMachine`].
//!
//! Pulls ready steps from the machine, runs them concurrently on a
//! [`JoinSet`], and feeds every resulting event back. Events a step posts
//! while running are delivered before that step's terminal event.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};

use crate::engine::events::TaskEvent;
use crate::engine::state_machine::{NextStep, TaskStateMachine};
use crate::engine::steps::TaskStep;
use crate::errors::EngineError;
use crate::exec::cancellation::CancellationContext;
use crate::exec::step_runner::{StepRunner, TaskEventSink};
use crate::ui::EventLogger;

/// Default cap on concurrently running steps: twice the CPU count.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        * 2
}

struct InFlight {
    step: TaskStep,
    counted: bool,
}

pub struct ParallelExecutionManager {
    runner: Arc<dyn StepRunner>,
    loggers: Vec<Arc<dyn EventLogger>>,
    cancellation: CancellationContext,
    max_parallelism: usize,
}

impl ParallelExecutionManager {
    pub fn new(
        runner: Arc<dyn StepRunner>,
        loggers: Vec<Arc<dyn EventLogger>>,
        cancellation: CancellationContext,
        max_parallelism: usize,
    ) -> Self {
        Self {
            runner,
            loggers,
            cancellation,
            max_parallelism: max_parallelism.max(1),
        }
    }

    /// Drive `machine` until both stages are finished.
    ///
    /// Returns an error only when the machine reports that no step can ever
    /// become ready; in-flight steps are awaited before returning it.
    pub async fn run(&self, machine: &mut TaskStateMachine) -> Result<(), EngineError> {
        let (sink, mut side_events) = TaskEventSink::channel();
        let mut running: JoinSet<TaskEvent> = JoinSet::new();
        let mut in_flight: HashMap<Id, InFlight> = HashMap::new();
        let mut counted_running = 0usize;
        let mut forwarded = self.forward_new_events(machine, 0);
        let mut interrupted = self.cancellation.is_cancelled();

        if interrupted {
            machine.abort();
            forwarded = self.forward_new_events(machine, forwarded);
        }

        loop {
            loop {
                // Steps that mostly wait do not take a slot. A step that needs
                // one stays queued in the machine until a slot frees up.
                if counted_running >= self.max_parallelism
                    && machine
                        .peek_next_step()
                        .is_some_and(TaskStep::counts_against_parallelism_cap)
                {
                    forwarded = self.forward_new_events(machine, forwarded);
                    break;
                }

                match machine.pop_next_step(!running.is_empty()) {
                    Ok(NextStep::Ready(step)) => {
                        let counted = step.counts_against_parallelism_cap();
                        if counted {
                            counted_running += 1;
                        }
                        machine.post_event(TaskEvent::StepStarting { step: step.clone() });
                        self.spawn(step, counted, &sink, &mut running, &mut in_flight);
                    }
                    Ok(NextStep::NoStepsReady) => {
                        forwarded = self.forward_new_events(machine, forwarded);
                        break;
                    }
                    Ok(NextStep::NoStepsRemaining) => {
                        self.forward_new_events(machine, forwarded);
                        info!(
                            task = %machine.graph().task().name,
                            exit_code = machine.exit_code(),
                            "task execution finished"
                        );
                        return Ok(());
                    }
                    Err(err) => {
                        warn!(error = %err, "no steps can become ready; waiting for in-flight steps");
                        while running.join_next().await.is_some() {}
                        return Err(err);
                    }
                }
            }

            tokio::select! {
                _ = self.cancellation.cancelled(), if !interrupted => {
                    interrupted = true;
                    info!("interrupt received; stopping run stage");
                    machine.abort();
                }
                Some(event) = side_events.recv() => {
                    machine.post_event(event);
                }
                Some(joined) = running.join_next_with_id(), if !running.is_empty() => {
                    while let Ok(event) = side_events.try_recv() {
                        machine.post_event(event);
                    }

                    let (id, event) = match joined {
                        Ok((id, event)) => (id, event),
                        Err(err) => {
                            let id = err.id();
                            let step = in_flight
                                .get(&id)
                                .map(|f| f.step.to_string())
                                .unwrap_or_default();
                            warn!(%step, error = %err, "step runner did not complete");
                            (id, TaskEvent::ExecutionFailed {
                                message: format!("the step '{step}' did not complete: {err}"),
                            })
                        }
                    };

                    if let Some(finished) = in_flight.remove(&id) {
                        if finished.counted {
                            counted_running -= 1;
                        }
                        debug!(step = %finished.step, event = %event, "step finished");
                    }
                    machine.post_event(event);
                }
            }

            forwarded = self.forward_new_events(machine, forwarded);
        }
    }

    fn spawn(
        &self,
        step: TaskStep,
        counted: bool,
        sink: &TaskEventSink,
        running: &mut JoinSet<TaskEvent>,
        in_flight: &mut HashMap<Id, InFlight>,
    ) {
        debug!(%step, counted, "starting step");
        let runner = self.runner.clone();
        let events = sink.clone();
        let task_step = step.clone();
        let handle = running.spawn(async move { runner.run(task_step, events).await });
        in_flight.insert(handle.id(), InFlight { step, counted });
    }

    /// Hand every event recorded since `already_forwarded` to the loggers.
    fn forward_new_events(&self, machine: &TaskStateMachine, already_forwarded: usize) -> usize {
        for event in machine.events().iter().skip(already_forwarded) {
            for logger in &self.loggers {
                logger.post_event(event);
            }
        }
        machine.events().len()
    }
}
