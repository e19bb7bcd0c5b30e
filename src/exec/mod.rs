// src/exec/mod.rs

//! Step execution layer.
//!
//! This module turns [`crate::engine::steps::TaskStep`]s into calls against a
//! container runtime and reports the outcome as task events.
//!
//! - [`backend`] defines the `ContainerRuntime` trait that step runners call,
//!   which tests replace with a fake implementation.
//! - [`docker_cli`] implements it on top of the `docker` executable.
//! - [`step_runner`] executes one step and produces its terminal event.
//! - [`creation_request`] names runtime resources and assembles container
//!   creation requests.
//! - [`run_as_current_user`], [`proxy`] and [`command_line`] are helpers for
//!   the creation request.
//! - [`cancellation`] and [`io`] carry the per-run cancellation signal and
//!   output routing.

pub mod backend;
pub mod cancellation;
pub mod command_line;
pub mod creation_request;
pub mod docker_cli;
pub mod io;
pub mod proxy;
pub mod run_as_current_user;
pub mod step_runner;

pub use backend::ContainerRuntime;
pub use cancellation::CancellationContext;
pub use docker_cli::DockerCliRuntime;
pub use step_runner::{StepRunContext, StepRunner, TaskEventSink, TaskStepRunner};
