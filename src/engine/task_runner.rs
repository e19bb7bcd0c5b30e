// src/engine/task_runner.rs

//! Runs a task, and its prerequisites, end to end.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::model::{Configuration, RunAsCurrentUserConfig, Task};
use crate::dag::{ContainerDependencyGraph, resolve_execution_order};
use crate::engine::execution_manager::{ParallelExecutionManager, default_parallelism};
use crate::engine::stages::RunStagePlanOptions;
use crate::engine::state_machine::{FAILED_EXIT_CODE, StateMachineOptions, TaskStateMachine};
use crate::errors::Result;
use crate::exec::backend::ContainerRuntime;
use crate::exec::cancellation::CancellationContext;
use crate::exec::creation_request::ResourceNames;
use crate::exec::io::IoStreamingOptions;
use crate::exec::proxy::ProxyEnvironment;
use crate::exec::run_as_current_user::CurrentUser;
use crate::exec::step_runner::{StepRunContext, TaskStepRunner};
use crate::fs::FileSystem;
use crate::types::{CleanupOption, OutputStyle};
use crate::ui::{EventLogger, TaskSummary};

pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TaskRunOptions {
    /// Appended to the main container's command of the requested task only.
    pub additional_arguments: Vec<String>,
    pub cleanup_after_success: CleanupOption,
    pub cleanup_after_failure: CleanupOption,
    pub propagate_proxy_variables: bool,
    pub max_parallelism: usize,
    pub stop_grace_period: Duration,
    pub output_style: OutputStyle,
    pub skip_prerequisites: bool,
}

impl Default for TaskRunOptions {
    fn default() -> Self {
        Self {
            additional_arguments: Vec::new(),
            cleanup_after_success: CleanupOption::Cleanup,
            cleanup_after_failure: CleanupOption::Cleanup,
            propagate_proxy_variables: true,
            max_parallelism: default_parallelism(),
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
            output_style: OutputStyle::default(),
            skip_prerequisites: false,
        }
    }
}

pub struct TaskRunner {
    config: Arc<Configuration>,
    runtime: Arc<dyn ContainerRuntime>,
    fs: Arc<dyn FileSystem>,
    loggers: Vec<Arc<dyn EventLogger>>,
    cancellation: CancellationContext,
    options: TaskRunOptions,
    proxy: Option<ProxyEnvironment>,
    current_user: Option<CurrentUser>,
}

impl TaskRunner {
    pub fn new(
        config: Arc<Configuration>,
        runtime: Arc<dyn ContainerRuntime>,
        fs: Arc<dyn FileSystem>,
        cancellation: CancellationContext,
        options: TaskRunOptions,
    ) -> Self {
        let proxy = options
            .propagate_proxy_variables
            .then(ProxyEnvironment::from_host);

        Self {
            config,
            runtime,
            fs,
            loggers: Vec::new(),
            cancellation,
            options,
            proxy,
            current_user: None,
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.loggers.push(logger);
        self
    }

    /// Replace the host's proxy variables, e.g. for tests.
    pub fn with_proxy_environment(mut self, proxy: Option<ProxyEnvironment>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Use `user` instead of detecting the current user.
    pub fn with_current_user(mut self, user: CurrentUser) -> Self {
        self.current_user = Some(user);
        self
    }

    /// Run `task_name` after its prerequisites, stopping at the first
    /// non-zero exit code. Returns the exit code of the last task run.
    pub async fn run_with_prerequisites(&self, task_name: &str) -> Result<i64> {
        let order =
            resolve_execution_order(&self.config, task_name, self.options.skip_prerequisites)?;
        let names: Vec<&str> = order.iter().map(|t| t.name.as_str()).collect();
        info!(task = %task_name, order = ?names, "resolved execution order");

        let mut exit_code = 0;
        for (index, task) in order.iter().enumerate() {
            let is_requested_task = index + 1 == order.len();
            let additional_arguments: &[String] = if is_requested_task {
                self.options.additional_arguments.as_slice()
            } else {
                &[]
            };

            exit_code = self.run_task(task, additional_arguments).await?;
            if exit_code != 0 {
                if !is_requested_task {
                    warn!(task = %task.name, exit_code, "prerequisite failed; not running remaining tasks");
                }
                return Ok(exit_code);
            }
            if self.cancellation.is_cancelled() {
                return Ok(FAILED_EXIT_CODE);
            }
        }

        Ok(exit_code)
    }

    /// Run a single task. A task without a container finishes immediately
    /// with exit code 0.
    pub async fn run_task(&self, task: &Task, additional_arguments: &[String]) -> Result<i64> {
        if task.run.is_none() {
            info!(task = %task.name, "task has no container to run");
            return Ok(0);
        }

        let graph = ContainerDependencyGraph::for_task(&self.config, task)?;
        let current_user = self.current_user_for(&graph)?;

        let runner = TaskStepRunner::new(StepRunContext {
            names: ResourceNames::new(&self.config.project_name, &task.name),
            main_container: graph.main_container_name().to_string(),
            runtime: self.runtime.clone(),
            fs: self.fs.clone(),
            current_user,
            proxy: self.proxy.clone(),
            io: IoStreamingOptions::new(self.options.output_style),
            stop_grace_period: self.options.stop_grace_period,
            cancellation: self.cancellation.clone(),
        });

        let plan_options = RunStagePlanOptions {
            project_name: self.config.project_name.clone(),
            additional_arguments: additional_arguments.to_vec(),
        };
        let mut machine = TaskStateMachine::new(
            graph,
            &plan_options,
            StateMachineOptions {
                cleanup_after_success: self.options.cleanup_after_success,
                cleanup_after_failure: self.options.cleanup_after_failure,
            },
        );

        for logger in &self.loggers {
            logger.on_task_starting(&task.name);
        }

        let manager = ParallelExecutionManager::new(
            Arc::new(runner),
            self.loggers.clone(),
            self.cancellation.clone(),
            self.options.max_parallelism,
        );
        manager.run(&mut machine).await?;

        let summary = TaskSummary::from_state_machine(&machine);
        for logger in &self.loggers {
            if summary.is_failure() {
                logger.on_task_failed(&summary);
            } else {
                logger.on_task_finished(&summary);
            }
        }

        Ok(summary.exit_code)
    }

    fn current_user_for(&self, graph: &ContainerDependencyGraph) -> Result<Option<CurrentUser>> {
        let needed = graph.containers().any(|c| {
            matches!(
                c.run_as_current_user,
                RunAsCurrentUserConfig::RunAsCurrentUser { .. }
            )
        });
        if !needed {
            return Ok(None);
        }

        match &self.current_user {
            Some(user) => Ok(Some(user.clone())),
            None => Ok(Some(CurrentUser::detect()?)),
        }
    }
}
