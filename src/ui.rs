// src/ui.rs

//! Console reporting of task progress.
//!
//! The execution manager hands every event to each [`EventLogger`] in the
//! order the state machine recorded it. Loggers never influence execution.

use std::io::Write;
use std::sync::Mutex;

use tracing::debug;

use crate::engine::events::TaskEvent;
use crate::engine::state_machine::{
    ManualCleanup, ManualCleanupReason, TaskOutcome, TaskStateMachine,
};
use crate::types::OutputStyle;

/// What a logger needs to know once a task has stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub task: String,
    pub exit_code: i64,
    pub outcome: TaskOutcome,
    pub supplementary_failures: Vec<String>,
    pub manual_cleanup: ManualCleanup,
}

impl TaskSummary {
    pub fn from_state_machine(machine: &TaskStateMachine) -> Self {
        Self {
            task: machine.graph().task().name.clone(),
            exit_code: machine.exit_code(),
            outcome: machine.outcome(),
            supplementary_failures: machine.supplementary_failures().to_vec(),
            manual_cleanup: machine.manual_cleanup().clone(),
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self.outcome, TaskOutcome::Succeeded { .. })
            || !self.supplementary_failures.is_empty()
    }
}

pub trait EventLogger: Send + Sync {
    fn on_task_starting(&self, task: &str);
    fn post_event(&self, event: &TaskEvent);
    fn on_task_finished(&self, summary: &TaskSummary);
    fn on_task_failed(&self, summary: &TaskSummary);
}

/// Prints concise progress lines to stderr.
pub struct SimpleEventLogger {
    style: OutputStyle,
    out: Mutex<Box<dyn Write + Send>>,
}

impl SimpleEventLogger {
    pub fn new(style: OutputStyle) -> Self {
        Self::with_writer(style, Box::new(std::io::stderr()))
    }

    pub fn with_writer(style: OutputStyle, out: Box<dyn Write + Send>) -> Self {
        Self {
            style,
            out: Mutex::new(out),
        }
    }

    fn write(&self, text: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(err) = writeln!(out, "{text}").and_then(|_| out.flush()) {
            debug!(error = %err, "could not write progress output");
        }
    }
}

impl EventLogger for SimpleEventLogger {
    fn on_task_starting(&self, task: &str) {
        if self.style != OutputStyle::Quiet {
            self.write(&format!("Running {task}..."));
        }
    }

    fn post_event(&self, event: &TaskEvent) {
        if self.style == OutputStyle::Quiet {
            return;
        }
        if let Some(line) = describe_event(event) {
            self.write(&line);
        }
    }

    fn on_task_finished(&self, summary: &TaskSummary) {
        if self.style != OutputStyle::Quiet {
            self.write(&format!(
                "{} finished with exit code {}.",
                summary.task, summary.exit_code
            ));
        }
        if let Some(instructions) = manual_cleanup_instructions(&summary.manual_cleanup) {
            self.write(&instructions);
        }
    }

    fn on_task_failed(&self, summary: &TaskSummary) {
        self.write(&failure_report(summary));
    }
}

/// One progress line for events worth showing, `None` for the rest.
pub fn describe_event(event: &TaskEvent) -> Option<String> {
    let line = match event {
        TaskEvent::ImageBuilt { source, .. } => format!("Built {source}."),
        TaskEvent::ImagePulled { source, .. } => format!("Pulled {source}."),
        TaskEvent::ContainerStarted { container } => format!("Started {container}."),
        TaskEvent::ContainerBecameHealthy { container } => {
            format!("{container} has become healthy.")
        }
        TaskEvent::RunningSetupCommand {
            container,
            command,
            index,
        } => format!(
            "Running setup command {} ({}) in {container}...",
            index + 1,
            command.command
        ),
        TaskEvent::ContainerBecameReady { container } => format!("{container} is ready."),
        TaskEvent::RunningContainerExited {
            container,
            exit_code,
        } => format!("{container} exited with code {exit_code}."),
        TaskEvent::UserInterruptedExecution => {
            "Interrupt received, stopping task and cleaning up...".to_string()
        }
        other if other.is_failure() => return other.failure_message(),
        _ => return None,
    };
    Some(line)
}

/// The primary failure, then supplementary failures, then manual cleanup
/// instructions when they are needed.
pub fn failure_report(summary: &TaskSummary) -> String {
    let mut lines = Vec::new();

    match &summary.outcome {
        TaskOutcome::Failed { message } => {
            lines.push(format!("{} failed: {message}", summary.task));
        }
        TaskOutcome::Interrupted => {
            lines.push(format!("{} was interrupted.", summary.task));
        }
        TaskOutcome::Succeeded { exit_code } => {
            lines.push(format!(
                "{} finished with exit code {exit_code}, but cleanup did not complete.",
                summary.task
            ));
        }
    }

    for failure in &summary.supplementary_failures {
        lines.push(format!("Warning: {failure}"));
    }

    if let Some(instructions) = manual_cleanup_instructions(&summary.manual_cleanup) {
        lines.push(instructions);
    }

    lines.join("\n")
}

pub fn manual_cleanup_instructions(manual_cleanup: &ManualCleanup) -> Option<String> {
    let ManualCleanup::Required { reason, commands } = manual_cleanup else {
        return None;
    };

    let preamble = match reason {
        ManualCleanupReason::CleanupDisabledAfterFailure => {
            "As the task was run with --no-cleanup-after-failure or --no-cleanup, the created containers will not be cleaned up.\n\
             Once you have finished investigating the issue, clean up all temporary resources by running:"
        }
        ManualCleanupReason::CleanupDisabledAfterSuccess => {
            "As the task was run with --no-cleanup-after-success or --no-cleanup, the created containers will not be cleaned up.\n\
             Once you have finished using the containers, clean up all temporary resources by running:"
        }
        ManualCleanupReason::CleanupFailed => {
            "Cleanup has failed, and not all temporary resources may have been removed.\n\
             You may need to run some or all of the following commands to clean up any remaining resources:"
        }
    };

    let mut text = String::from(preamble);
    text.push('\n');
    for command in commands {
        text.push_str("\n    ");
        text.push_str(command);
    }
    Some(text)
}
