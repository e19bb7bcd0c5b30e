// src/engine/mod.rs

//! Orchestration engine for taskbox.
//!
//! This module ties together:
//! - the events, steps and rules that describe a task run
//! - the run and cleanup stage planners
//! - the task state machine that decides what may run next
//! - the parallel execution manager that runs steps and feeds back events
//! - the task runner that wires all of it up for one task and its
//!   prerequisites
//!
//! The pure core state machine lives in [`state_machine`]; the async/IO shell
//! is implemented in [`execution_manager`].

pub mod events;
pub mod execution_manager;
pub mod rules;
pub mod stages;
pub mod state_machine;
pub mod steps;
pub mod task_runner;

pub use events::{EventLog, TaskEvent, TaskEventKind};
pub use execution_manager::ParallelExecutionManager;
pub use state_machine::{
    FAILED_EXIT_CODE, ManualCleanup, ManualCleanupReason, NextStep, StateMachineOptions,
    TaskOutcome, TaskStateMachine, TaskStatus,
};
pub use steps::{TaskStep, TaskStepKind};
pub use task_runner::{TaskRunOptions, TaskRunner};
