// src/exec/step_runner.rs

//! Executes one [`TaskStep`] against the container runtime.
//!
//! A runner returns exactly one terminal event for the step. Anything it
//! learns along the way (build output, temporary files it created, the main
//! container having started) is posted through a [`TaskEventSink`] before the
//! terminal event is returned. Runtime errors never escape as `Err`: each one
//! becomes the failure event for the step.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::model::{Container, ContainerName, ImageSource, RunAsCurrentUserConfig};
use crate::engine::events::{RuntimeContainer, RuntimeImage, RuntimeNetwork, TaskEvent};
use crate::engine::steps::{ContainerRuntimeConfiguration, TaskStep};
use crate::exec::backend::{
    CacheInitialisationRequest, ContainerRuntime, ExecRequest, HealthStatus, ImageBuildRequest,
    ProgressSink,
};
use crate::exec::cancellation::CancellationContext;
use crate::exec::command_line;
use crate::exec::creation_request::{CreationContext, ResourceNames, build_creation_request};
use crate::exec::io::IoStreamingOptions;
use crate::exec::proxy::ProxyEnvironment;
use crate::exec::run_as_current_user::{self, CurrentUser};
use crate::fs::FileSystem;

/// Channel for events a step produces before its terminal event.
#[derive(Debug, Clone)]
pub struct TaskEventSink {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl TaskEventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Dropped silently once the receiving side is gone.
    pub fn post(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }
}

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = TaskEvent> + Send + 'a>>;

/// Seam between the execution manager and step execution.
pub trait StepRunner: Send + Sync {
    fn run(&self, step: TaskStep, events: TaskEventSink) -> StepFuture<'_>;
}

/// Everything the runners need that is fixed for one task run.
pub struct StepRunContext {
    pub names: ResourceNames,
    pub main_container: ContainerName,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub fs: Arc<dyn FileSystem>,
    pub current_user: Option<CurrentUser>,
    pub proxy: Option<ProxyEnvironment>,
    pub io: IoStreamingOptions,
    pub stop_grace_period: Duration,
    pub cancellation: CancellationContext,
}

pub struct TaskStepRunner {
    ctx: StepRunContext,
}

impl StepRunner for TaskStepRunner {
    fn run(&self, step: TaskStep, events: TaskEventSink) -> StepFuture<'_> {
        Box::pin(self.execute(step, events))
    }
}

impl TaskStepRunner {
    pub fn new(ctx: StepRunContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &StepRunContext {
        &self.ctx
    }

    pub async fn execute(&self, step: TaskStep, events: TaskEventSink) -> TaskEvent {
        debug!(step = %step, "running step");

        let event = match step {
            TaskStep::InitialiseCaches { containers } => self.initialise_caches(&containers).await,
            TaskStep::CreateTaskNetwork => self.create_network().await,
            TaskStep::BuildImage { source, image_tags } => {
                self.build_image(source, image_tags, &events).await
            }
            TaskStep::PullImage { source } => self.pull_image(source, &events).await,
            TaskStep::CreateContainer {
                container,
                config,
                image,
                network,
            } => {
                self.create_container(&container, &config, &image, &network, &events)
                    .await
            }
            TaskStep::StartContainer { container, runtime } => {
                self.start_container(container, runtime).await
            }
            TaskStep::WaitForContainerToBecomeHealthy { container, runtime } => {
                self.wait_for_health(container, runtime).await
            }
            TaskStep::RunContainerSetupCommands {
                container,
                config,
                runtime,
            } => {
                self.run_setup_commands(&container, &config, runtime, &events)
                    .await
            }
            TaskStep::RunContainer { container, runtime } => {
                self.run_container(container, runtime, &events).await
            }
            TaskStep::StopContainer { container, runtime } => {
                self.stop_container(container, runtime).await
            }
            TaskStep::RemoveContainer { container, runtime } => {
                self.remove_container(container, runtime).await
            }
            TaskStep::DeleteTemporaryFile { path } => self.delete_temporary_file(path),
            TaskStep::DeleteTemporaryDirectory { path } => self.delete_temporary_directory(path),
            TaskStep::DeleteTaskNetwork { network } => self.delete_network(network).await,
        };

        match event.failure_message() {
            Some(message) => error!(event = ?event.kind(), %message, "step failed"),
            None => debug!(event = ?event.kind(), "step finished"),
        }

        event
    }

    async fn initialise_caches(&self, containers: &[Container]) -> TaskEvent {
        let mut caches: BTreeMap<&str, Vec<&Container>> = BTreeMap::new();
        for container in containers {
            for (cache, _) in container.cache_mounts() {
                caches.entry(cache).or_default().push(container);
            }
        }

        for (cache, users) in &caches {
            if let Some(message) = inconsistent_cache_users(cache, users) {
                return TaskEvent::CacheInitialisationFailed { message };
            }
        }

        for (cache, users) in caches {
            let as_current_user = users.first().is_some_and(|c| runs_as_current_user(c));
            let owner = match (as_current_user, &self.ctx.current_user) {
                (false, _) => None,
                (true, Some(user)) => Some(user.user_and_group()),
                (true, None) => {
                    return TaskEvent::CacheInitialisationFailed {
                        message: "The current user could not be determined.".to_string(),
                    };
                }
            };

            let request = CacheInitialisationRequest {
                volume_name: self.ctx.names.cache_volume(cache),
                owner,
            };
            if let Err(err) = self.ctx.runtime.initialise_cache(request).await {
                return TaskEvent::CacheInitialisationFailed {
                    message: err.to_string(),
                };
            }
        }

        TaskEvent::CachesInitialised
    }

    async fn create_network(&self) -> TaskEvent {
        match self.ctx.runtime.create_network(self.ctx.names.network()).await {
            Ok(network) => {
                info!(network = %network.id, "created task network");
                TaskEvent::TaskNetworkCreated { network }
            }
            Err(err) => TaskEvent::TaskNetworkCreationFailed {
                message: err.to_string(),
            },
        }
    }

    async fn build_image(
        &self,
        source: ImageSource,
        image_tags: BTreeSet<String>,
        events: &TaskEventSink,
    ) -> TaskEvent {
        let ImageSource::Build {
            build_directory,
            dockerfile,
            build_args,
        } = &source
        else {
            return TaskEvent::ImageBuildFailed {
                message: format!("{source} is not built from a directory"),
                source,
            };
        };

        let mut args = self
            .ctx
            .proxy
            .as_ref()
            .map(ProxyEnvironment::for_build)
            .unwrap_or_default();
        args.extend(build_args.clone());

        let request = ImageBuildRequest {
            build_directory: build_directory.clone(),
            dockerfile: dockerfile.clone(),
            build_args: args,
            image_tags,
        };

        let progress = {
            let events = events.clone();
            let source = source.clone();
            ProgressSink::new(move |message| {
                events.post(TaskEvent::ImageBuildProgress {
                    source: source.clone(),
                    message,
                })
            })
        };

        match self
            .ctx
            .runtime
            .build_image(request, progress, self.ctx.cancellation.clone())
            .await
        {
            Ok(image) => TaskEvent::ImageBuilt { source, image },
            Err(err) => TaskEvent::ImageBuildFailed {
                source,
                message: err.to_string(),
            },
        }
    }

    async fn pull_image(&self, source: ImageSource, events: &TaskEventSink) -> TaskEvent {
        let ImageSource::Pull { image } = &source else {
            return TaskEvent::ImagePullFailed {
                message: format!("{source} is not a pullable image"),
                source,
            };
        };

        let progress = {
            let events = events.clone();
            let source = source.clone();
            ProgressSink::new(move |message| {
                events.post(TaskEvent::ImagePullProgress {
                    source: source.clone(),
                    message,
                })
            })
        };

        match self
            .ctx
            .runtime
            .pull_image(image.clone(), progress, self.ctx.cancellation.clone())
            .await
        {
            Ok(image) => TaskEvent::ImagePulled { source, image },
            Err(err) => TaskEvent::ImagePullFailed {
                source,
                message: err.to_string(),
            },
        }
    }

    async fn create_container(
        &self,
        container: &Container,
        config: &ContainerRuntimeConfiguration,
        image: &RuntimeImage,
        network: &RuntimeNetwork,
        events: &TaskEventSink,
    ) -> TaskEvent {
        let failed = |message: String| TaskEvent::ContainerCreationFailed {
            container: container.name.clone(),
            message,
        };

        let run_as = match run_as_current_user::generate_configuration(
            container,
            self.ctx.current_user.as_ref(),
            self.ctx.fs.as_ref(),
            events,
        ) {
            Ok(run_as) => run_as,
            Err(err) => return failed(format!("{err:#}")),
        };

        let is_main = container.name == self.ctx.main_container;
        let creation = CreationContext {
            names: &self.ctx.names,
            proxy: self.ctx.proxy.as_ref(),
            attach_stdin: self.ctx.io.for_container(&container.name, is_main).attach_stdin,
        };
        let request =
            match build_creation_request(creation, container, config, image, network, run_as) {
                Ok(request) => request,
                Err(message) => return failed(message),
            };

        match self.ctx.runtime.create_container(request).await {
            Ok(runtime) => TaskEvent::ContainerCreated {
                container: container.name.clone(),
                runtime,
            },
            Err(err) => failed(err.to_string()),
        }
    }

    async fn start_container(&self, container: ContainerName, runtime: RuntimeContainer) -> TaskEvent {
        let io = self.ctx.io.for_container(&container, false);
        match self.ctx.runtime.start_container(runtime, io).await {
            Ok(()) => TaskEvent::ContainerStarted { container },
            Err(err) => TaskEvent::ContainerStartFailed {
                container,
                message: err.to_string(),
            },
        }
    }

    async fn wait_for_health(&self, container: ContainerName, runtime: RuntimeContainer) -> TaskEvent {
        let status = match self.ctx.runtime.wait_for_health_status(runtime.clone()).await {
            Ok(status) => status,
            Err(err) => {
                return TaskEvent::ContainerDidNotBecomeHealthy {
                    container,
                    message: format!("Waiting for the container's health status failed: {err}"),
                };
            }
        };

        let message = match status {
            HealthStatus::NoHealthCheck | HealthStatus::BecameHealthy => {
                return TaskEvent::ContainerBecameHealthy { container };
            }
            HealthStatus::Exited => "The container exited before becoming healthy.".to_string(),
            HealthStatus::BecameUnhealthy => {
                match self.ctx.runtime.last_health_check_result(runtime).await {
                    Ok(result) => unhealthy_message(result.exit_code, &result.output),
                    Err(err) => {
                        format!("Waiting for the container's health status failed: {err}")
                    }
                }
            }
        };

        TaskEvent::ContainerDidNotBecomeHealthy { container, message }
    }

    async fn run_setup_commands(
        &self,
        container: &Container,
        config: &ContainerRuntimeConfiguration,
        runtime: RuntimeContainer,
        events: &TaskEventSink,
    ) -> TaskEvent {
        let mut environment = self
            .ctx
            .proxy
            .as_ref()
            .map(|proxy| proxy.for_container(&config.all_containers_in_network))
            .unwrap_or_default();
        environment.extend(config.environment.clone());
        let user =
            run_as_current_user::determine_user_and_group(container, self.ctx.current_user.as_ref());

        for (index, command) in container.setup_commands.iter().enumerate() {
            events.post(TaskEvent::RunningSetupCommand {
                container: container.name.clone(),
                command: command.clone(),
                index,
            });

            let execution_error = |message: String| TaskEvent::SetupCommandExecutionError {
                container: container.name.clone(),
                command: command.clone(),
                message,
            };

            let argv = match command_line::parse(&command.command) {
                Ok(argv) => argv,
                Err(message) => return execution_error(message),
            };

            let request = ExecRequest {
                command: argv,
                environment: environment.clone(),
                working_directory: command
                    .working_directory
                    .clone()
                    .or_else(|| config.working_directory.clone()),
                user,
            };

            match self
                .ctx
                .runtime
                .exec_in_container(runtime.clone(), request)
                .await
            {
                Ok(result) if result.exit_code == 0 => {}
                Ok(result) => {
                    return TaskEvent::SetupCommandFailed {
                        container: container.name.clone(),
                        command: command.clone(),
                        exit_code: result.exit_code,
                        output: result.output,
                    };
                }
                Err(err) => return execution_error(err.to_string()),
            }
        }

        TaskEvent::ContainerBecameReady {
            container: container.name.clone(),
        }
    }

    async fn run_container(
        &self,
        container: ContainerName,
        runtime: RuntimeContainer,
        events: &TaskEventSink,
    ) -> TaskEvent {
        let io = self
            .ctx
            .io
            .for_container(&container, container == self.ctx.main_container);

        // Recorded up front so an interrupted run still gets a stop rule.
        events.post(TaskEvent::ContainerStarted {
            container: container.clone(),
        });

        match self
            .ctx
            .runtime
            .run_container(runtime, io, self.ctx.cancellation.clone())
            .await
        {
            Ok(exit_code) => {
                info!(container = %container, exit_code, "container exited");
                TaskEvent::RunningContainerExited {
                    container,
                    exit_code,
                }
            }
            Err(err) => TaskEvent::ContainerRunFailed {
                container,
                message: err.to_string(),
            },
        }
    }

    async fn stop_container(&self, container: ContainerName, runtime: RuntimeContainer) -> TaskEvent {
        match self
            .ctx
            .runtime
            .stop_container(runtime, self.ctx.stop_grace_period)
            .await
        {
            Ok(()) => TaskEvent::ContainerStopped { container },
            Err(err) => TaskEvent::ContainerStopFailed {
                container,
                message: err.to_string(),
            },
        }
    }

    async fn remove_container(&self, container: ContainerName, runtime: RuntimeContainer) -> TaskEvent {
        match self.ctx.runtime.remove_container(runtime).await {
            Ok(()) => TaskEvent::ContainerRemoved { container },
            Err(err) => TaskEvent::ContainerRemovalFailed {
                container,
                message: err.to_string(),
            },
        }
    }

    fn delete_temporary_file(&self, path: PathBuf) -> TaskEvent {
        match self.ctx.fs.remove_file(&path) {
            Ok(()) => TaskEvent::TemporaryFileDeleted { path },
            Err(err) => TaskEvent::TemporaryFileDeletionFailed {
                path,
                message: format!("{err:#}"),
            },
        }
    }

    fn delete_temporary_directory(&self, path: PathBuf) -> TaskEvent {
        match self.ctx.fs.remove_dir_all(&path) {
            Ok(()) => TaskEvent::TemporaryDirectoryDeleted { path },
            Err(err) => TaskEvent::TemporaryDirectoryDeletionFailed {
                path,
                message: format!("{err:#}"),
            },
        }
    }

    async fn delete_network(&self, network: RuntimeNetwork) -> TaskEvent {
        match self.ctx.runtime.delete_network(network).await {
            Ok(()) => TaskEvent::TaskNetworkDeleted,
            Err(err) => TaskEvent::TaskNetworkDeletionFailed {
                message: err.to_string(),
            },
        }
    }
}

fn runs_as_current_user(container: &Container) -> bool {
    matches!(
        container.run_as_current_user,
        RunAsCurrentUserConfig::RunAsCurrentUser { .. }
    )
}

/// Containers sharing a cache must agree on whether they run as the current
/// user, otherwise the cache's ownership would suit only one of them.
fn inconsistent_cache_users(cache: &str, users: &[&Container]) -> Option<String> {
    let first = users.first()?;
    let other = users
        .iter()
        .find(|c| runs_as_current_user(c) != runs_as_current_user(first))?;

    Some(format!(
        "Containers '{}' and '{}' share the '{}' cache, but one has run as current user enabled and the other does not. \
         Caches can only be shared by containers if they either both have run as current user enabled or both have it disabled.",
        first.name, other.name, cache
    ))
}

pub(crate) fn unhealthy_message(exit_code: i64, output: &str) -> String {
    let prefix = "The configured health check did not indicate that the container was healthy within the timeout period.";
    let output = output.trim();

    if exit_code == 0 {
        format!(
            "{prefix} The most recent health check exited with code 0, which usually indicates that the container became healthy just after the timeout period expired."
        )
    } else if output.is_empty() {
        format!(
            "{prefix} The last health check exited with code {exit_code} but did not produce any output."
        )
    } else {
        format!("{prefix} The last health check exited with code {exit_code} and output:\n{output}")
    }
}
