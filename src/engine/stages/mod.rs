// src/engine/stages/mod.rs

//! Run and cleanup stages.
//!
//! A stage is the set of rules not yet turned into steps. Planners are pure
//! functions of the graph (and, for cleanup, the event log); stages hold the
//! result and hand out steps as their rules become ready.

pub mod cleanup_planner;
pub mod run_planner;

use std::collections::BTreeSet;

use crate::dag::ContainerDependencyGraph;
use crate::engine::events::EventLog;
use crate::engine::rules::{CleanupStepRule, RuleEvaluation, RunStepRule, StepRule};
use crate::engine::steps::TaskStep;
use crate::types::CleanupOption;

pub use cleanup_planner::{manual_cleanup_commands, plan_cleanup_stage};
pub use run_planner::{RunStagePlanOptions, plan_run_stage};

#[derive(Debug, Clone)]
pub struct Stage<R> {
    remaining: Vec<R>,
}

impl<R: StepRule> Stage<R> {
    pub fn new(rules: Vec<R>) -> Self {
        Self { remaining: rules }
    }

    /// Rules not yet turned into steps.
    pub fn remaining_rules(&self) -> &[R] {
        &self.remaining
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Remove every rule that is ready against `events` and return its step,
    /// in rule order.
    pub fn take_ready_steps(&mut self, events: &EventLog) -> Vec<TaskStep> {
        let mut steps = Vec::new();
        self.remaining.retain(|rule| match rule.evaluate(events) {
            RuleEvaluation::Ready(step) => {
                steps.push(step);
                false
            }
            RuleEvaluation::NotReady => true,
        });
        steps
    }

    fn push(&mut self, rule: R) {
        self.remaining.push(rule);
    }
}

pub type RunStage = Stage<RunStepRule>;

impl RunStage {
    pub fn plan(graph: &ContainerDependencyGraph, options: &RunStagePlanOptions) -> Self {
        Stage::new(plan_run_stage(graph, options))
    }
}

/// The cleanup stage plus everything needed to tell the user how to clean
/// up by hand.
#[derive(Debug, Clone)]
pub struct CleanupStage {
    stage: Stage<CleanupStepRule>,
    option: CleanupOption,
    /// Every rule ever planned, whether or not this stage executes it.
    planned: BTreeSet<CleanupStepRule>,
    manual_cleanup_commands: Vec<String>,
}

impl CleanupStage {
    pub fn create(graph: &ContainerDependencyGraph, events: &EventLog, option: CleanupOption) -> Self {
        let mut stage = Self {
            stage: Stage::new(Vec::new()),
            option,
            planned: BTreeSet::new(),
            manual_cleanup_commands: Vec::new(),
        };
        stage.refresh(graph, events);
        stage
    }

    /// Re-plan against the current events and add only rules not seen before.
    ///
    /// Returns the number of rules added.
    pub fn refresh(&mut self, graph: &ContainerDependencyGraph, events: &EventLog) -> usize {
        let mut added = 0;

        for rule in plan_cleanup_stage(graph, events) {
            if !self.planned.insert(rule.clone()) {
                continue;
            }
            if self.option == CleanupOption::Cleanup || rule.is_stop() {
                self.stage.push(rule);
                added += 1;
            }
        }

        let all: Vec<CleanupStepRule> = self.planned.iter().cloned().collect();
        self.manual_cleanup_commands = manual_cleanup_commands(&all);

        added
    }

    pub fn manual_cleanup_commands(&self) -> &[String] {
        &self.manual_cleanup_commands
    }

    /// Instructions for the rules this stage does not execute itself.
    pub fn skipped_cleanup_commands(&self) -> Vec<String> {
        let skipped: Vec<CleanupStepRule> = self
            .planned
            .iter()
            .filter(|r| self.option == CleanupOption::DontCleanup && !r.is_stop())
            .cloned()
            .collect();
        manual_cleanup_commands(&skipped)
    }

    pub fn remaining_rules(&self) -> &[CleanupStepRule] {
        self.stage.remaining_rules()
    }

    pub fn is_complete(&self) -> bool {
        self.stage.is_complete()
    }

    pub fn take_ready_steps(&mut self, events: &EventLog) -> Vec<TaskStep> {
        self.stage.take_ready_steps(events)
    }
}
