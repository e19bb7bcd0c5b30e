// src/engine/rules/mod.rs

//! Step rules: a step plus the condition under which it may be queued.
//!
//! Rules are evaluated against the event log each time it changes. A rule
//! that evaluates to [`RuleEvaluation::Ready`] is removed from its stage and
//! its step is queued exactly once.

pub mod cleanup;
pub mod run;

pub use cleanup::{CleanupStepRule, ManualCleanupSortOrder};
pub use run::RunStepRule;

use crate::engine::events::EventLog;
use crate::engine::steps::TaskStep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEvaluation {
    Ready(TaskStep),
    NotReady,
}

pub trait StepRule {
    fn evaluate(&self, events: &EventLog) -> RuleEvaluation;
}
