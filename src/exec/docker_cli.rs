// src/exec/docker_cli.rs

//! [`ContainerRuntime`] backed by the `docker` command-line client.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::events::{RuntimeContainer, RuntimeImage, RuntimeNetwork};
use crate::errors::RuntimeError;
use crate::exec::backend::{
    CacheInitialisationRequest, ContainerCreationRequest, ContainerRuntime, ExecRequest,
    ExecResult, HealthCheckResult, HealthStatus, ImageBuildRequest, MountSource, ProgressSink,
    RuntimeFuture, UserAndGroup,
};
use crate::exec::cancellation::CancellationContext;
use crate::exec::io::{ContainerIoStreaming, OutputTarget};

/// Image used to set ownership on freshly created cache volumes.
const CACHE_INIT_IMAGE: &str = "busybox:stable";

#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
    executable: String,
    health_poll_interval: Duration,
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self {
            executable: "docker".to_string(),
            health_poll_interval: Duration::from_millis(500),
        }
    }
}

impl DockerCliRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.executable);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Run to completion and return trimmed stdout. A non-zero exit is an
    /// error carrying stderr.
    async fn output(&self, args: Vec<String>) -> Result<String, RuntimeError> {
        debug!(args = ?args, "invoking docker");
        let output = self.command(&args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::failed(format!(
                "docker {} failed: {}",
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run while forwarding every output line to `progress`. The child is
    /// killed if `cancel` fires first.
    async fn streaming(
        &self,
        args: Vec<String>,
        progress: ProgressSink,
        cancel: CancellationContext,
    ) -> Result<(), RuntimeError> {
        debug!(args = ?args, "invoking docker with progress");
        let mut child = self
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let last_error = std::sync::Arc::new(std::sync::Mutex::new(String::new()));
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let progress = progress.clone();
            readers.push(forward_lines(stdout, move |line| progress.report(line)));
        }
        if let Some(stderr) = child.stderr.take() {
            let last_error = last_error.clone();
            readers.push(forward_lines(stderr, move |line| {
                progress.report(line.clone());
                if let Ok(mut last) = last_error.lock() {
                    *last = line;
                }
            }));
        }

        // Every progress line is delivered before the caller sees the result.
        let status = wait_or_cancel(&mut child, &cancel).await;
        drain(readers).await;
        let status = status?;
        if status.success() {
            return Ok(());
        }

        let detail = last_error
            .lock()
            .map(|last| last.clone())
            .unwrap_or_default();
        Err(RuntimeError::failed(format!(
            "docker {} failed with {}: {}",
            args.first().map(String::as_str).unwrap_or_default(),
            status,
            detail
        )))
    }

    async fn inspect_state(&self, container: &RuntimeContainer) -> Result<ContainerState, RuntimeError> {
        let json = self
            .output(vec![
                "inspect".into(),
                "--format".into(),
                "{{json .State}}".into(),
                container.id.clone(),
            ])
            .await?;

        serde_json::from_str(&json).map_err(|err| {
            RuntimeError::failed(format!("could not parse state of container {}: {err}", container.id))
        })
    }

    async fn image_id(&self, reference: &str) -> Result<RuntimeImage, RuntimeError> {
        let id = self
            .output(vec![
                "image".into(),
                "inspect".into(),
                "--format".into(),
                "{{.Id}}".into(),
                reference.to_string(),
            ])
            .await?;
        Ok(RuntimeImage { id })
    }
}

/// The parts of `docker inspect`'s `.State` this runtime reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    status: String,
    #[serde(default)]
    exit_code: i64,
    #[serde(default)]
    health: Option<HealthState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthState {
    status: String,
    #[serde(default)]
    log: Vec<HealthLogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthLogEntry {
    exit_code: i64,
    #[serde(default)]
    output: String,
}

fn forward_lines<R>(reader: R, mut sink: impl FnMut(String) + Send + 'static) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            sink(line);
        }
    })
}

/// Wait for output forwarders to reach end of stream.
async fn drain(readers: Vec<JoinHandle<()>>) {
    for reader in readers {
        if let Err(err) = reader.await {
            warn!(error = %err, "output forwarder failed");
        }
    }
}

/// Forward a child's piped output with each line prefixed by `prefix`.
fn forward_prefixed(child: &mut Child, prefix: &str) -> Vec<JoinHandle<()>> {
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        let prefix = prefix.to_string();
        readers.push(forward_lines(stdout, move |line| println!("{prefix} | {line}")));
    }
    if let Some(stderr) = child.stderr.take() {
        let prefix = prefix.to_string();
        readers.push(forward_lines(stderr, move |line| eprintln!("{prefix} | {line}")));
    }
    readers
}

async fn wait_or_cancel(
    child: &mut Child,
    cancel: &CancellationContext,
) -> Result<ExitStatus, RuntimeError> {
    tokio::select! {
        status = child.wait() => Ok(status?),
        _ = cancel.cancelled() => {
            warn!("cancelling docker invocation");
            if let Err(err) = child.kill().await {
                warn!(error = %err, "failed to kill docker process");
            }
            Err(RuntimeError::Cancelled)
        }
    }
}

fn user_flag(user: &UserAndGroup) -> String {
    format!("{}:{}", user.uid, user.gid)
}

/// `docker stop --time` takes whole seconds; partial seconds round up.
fn stop_timeout_secs(grace_period: Duration) -> u128 {
    grace_period.as_millis().div_ceil(1000)
}

fn duration_flag(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}

/// Arguments for `docker create`, image and command last.
pub(crate) fn creation_arguments(request: &ContainerCreationRequest) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "create".into(),
        "--name".into(),
        request.name.clone(),
        "--hostname".into(),
        request.hostname.clone(),
        "--network".into(),
        request.network.id.clone(),
        "--log-driver".into(),
        request.log_driver.clone(),
    ];

    for alias in &request.network_aliases {
        args.extend(["--network-alias".into(), alias.clone()]);
    }
    for (name, value) in &request.environment {
        args.extend(["--env".into(), format!("{name}={value}")]);
    }
    for mount in &request.mounts {
        let source = match &mount.source {
            MountSource::HostPath(path) => path.display().to_string(),
            MountSource::Volume(name) => name.clone(),
        };
        let spec = match &mount.options {
            Some(options) => format!("{source}:{}:{options}", mount.container_path),
            None => format!("{source}:{}", mount.container_path),
        };
        args.extend(["--volume".into(), spec]);
    }
    for port in &request.port_mappings {
        args.extend(["--publish".into(), port.to_string()]);
    }
    if let Some(dir) = &request.working_directory {
        args.extend(["--workdir".into(), dir.clone()]);
    }
    if let Some(user) = &request.user {
        args.extend(["--user".into(), user_flag(user)]);
    }
    if request.privileged {
        args.push("--privileged".into());
    }
    if request.attach_stdin {
        args.push("--interactive".into());
    }

    let health = &request.health_check;
    if let Some(command) = &health.command {
        args.extend(["--health-cmd".into(), command.clone()]);
    }
    if let Some(interval) = health.interval {
        args.extend(["--health-interval".into(), duration_flag(interval)]);
    }
    if let Some(retries) = health.retries {
        args.extend(["--health-retries".into(), retries.to_string()]);
    }
    if let Some(start_period) = health.start_period {
        args.extend(["--health-start-period".into(), duration_flag(start_period)]);
    }
    if let Some(timeout) = health.timeout {
        args.extend(["--health-timeout".into(), duration_flag(timeout)]);
    }

    // `--entrypoint` takes one executable; the rest of the entrypoint is
    // prepended to the command.
    let mut command = Vec::new();
    if let Some((executable, rest)) = request.entrypoint.split_first() {
        args.extend(["--entrypoint".into(), executable.clone()]);
        command.extend(rest.iter().cloned());
    }
    command.extend(request.command.iter().cloned());

    args.push(request.image.id.clone());
    args.extend(command);
    args
}

impl ContainerRuntime for DockerCliRuntime {
    fn build_image(
        &self,
        request: ImageBuildRequest,
        progress: ProgressSink,
        cancel: CancellationContext,
    ) -> RuntimeFuture<'_, RuntimeImage> {
        Box::pin(async move {
            let iid_file = tempfile::Builder::new().prefix("taskbox-iid-").tempfile()?;

            let mut args: Vec<String> = vec![
                "build".into(),
                "--file".into(),
                request
                    .build_directory
                    .join(&request.dockerfile)
                    .display()
                    .to_string(),
                "--iidfile".into(),
                iid_file.path().display().to_string(),
            ];
            for tag in &request.image_tags {
                args.extend(["--tag".into(), tag.clone()]);
            }
            for (name, value) in &request.build_args {
                args.extend(["--build-arg".into(), format!("{name}={value}")]);
            }
            args.push(request.build_directory.display().to_string());

            self.streaming(args, progress, cancel).await?;

            let id = tokio::fs::read_to_string(iid_file.path()).await?;
            info!(image = %id.trim(), "built image");
            Ok(RuntimeImage {
                id: id.trim().to_string(),
            })
        })
    }

    fn pull_image(
        &self,
        image: String,
        progress: ProgressSink,
        cancel: CancellationContext,
    ) -> RuntimeFuture<'_, RuntimeImage> {
        Box::pin(async move {
            if let Ok(existing) = self.image_id(&image).await {
                debug!(image = %image, "image already present");
                return Ok(existing);
            }

            self.streaming(vec!["pull".into(), image.clone()], progress, cancel)
                .await?;
            self.image_id(&image).await
        })
    }

    fn create_network(&self, name: String) -> RuntimeFuture<'_, RuntimeNetwork> {
        Box::pin(async move {
            let id = self
                .output(vec![
                    "network".into(),
                    "create".into(),
                    "--driver".into(),
                    "bridge".into(),
                    name,
                ])
                .await?;
            Ok(RuntimeNetwork { id })
        })
    }

    fn delete_network(&self, network: RuntimeNetwork) -> RuntimeFuture<'_, ()> {
        Box::pin(async move {
            self.output(vec!["network".into(), "rm".into(), network.id])
                .await
                .map(drop)
        })
    }

    fn initialise_cache(&self, request: CacheInitialisationRequest) -> RuntimeFuture<'_, ()> {
        Box::pin(async move {
            self.output(vec![
                "volume".into(),
                "create".into(),
                request.volume_name.clone(),
            ])
            .await?;

            if let Some(owner) = request.owner {
                self.output(vec![
                    "run".into(),
                    "--rm".into(),
                    "--volume".into(),
                    format!("{}:/cache", request.volume_name),
                    CACHE_INIT_IMAGE.into(),
                    "chown".into(),
                    user_flag(&owner),
                    "/cache".into(),
                ])
                .await?;
            }

            Ok(())
        })
    }

    fn create_container(
        &self,
        request: ContainerCreationRequest,
    ) -> RuntimeFuture<'_, RuntimeContainer> {
        Box::pin(async move {
            let id = self.output(creation_arguments(&request)).await?;
            Ok(RuntimeContainer {
                id,
                name: request.name,
            })
        })
    }

    fn start_container(
        &self,
        container: RuntimeContainer,
        io: ContainerIoStreaming,
    ) -> RuntimeFuture<'_, ()> {
        Box::pin(async move {
            self.output(vec!["start".into(), container.id.clone()])
                .await?;

            if let OutputTarget::Prefixed(prefix) = io.output {
                let mut logs = self
                    .command(["logs", "--follow", container.id.as_str()])
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(false)
                    .spawn()?;
                let readers = forward_prefixed(&mut logs, &prefix);
                // The follower ends when the container stops, which is
                // after this step has finished.
                tokio::spawn(async move {
                    if let Err(err) = logs.wait().await {
                        warn!(error = %err, "docker logs exited abnormally");
                    }
                    drain(readers).await;
                });
            }

            Ok(())
        })
    }

    fn wait_for_health_status(&self, container: RuntimeContainer) -> RuntimeFuture<'_, HealthStatus> {
        Box::pin(async move {
            loop {
                let state = self.inspect_state(&container).await?;

                let Some(health) = state.health.as_ref() else {
                    return Ok(HealthStatus::NoHealthCheck);
                };
                if matches!(state.status.as_str(), "exited" | "dead") {
                    return Ok(HealthStatus::Exited);
                }

                match health.status.as_str() {
                    "healthy" => return Ok(HealthStatus::BecameHealthy),
                    "unhealthy" => return Ok(HealthStatus::BecameUnhealthy),
                    _ => tokio::time::sleep(self.health_poll_interval).await,
                }
            }
        })
    }

    fn last_health_check_result(
        &self,
        container: RuntimeContainer,
    ) -> RuntimeFuture<'_, HealthCheckResult> {
        Box::pin(async move {
            let state = self.inspect_state(&container).await?;
            let last = state
                .health
                .and_then(|health| health.log.into_iter().last())
                .ok_or_else(|| {
                    RuntimeError::failed(format!(
                        "container {} has no health check results",
                        container.id
                    ))
                })?;

            Ok(HealthCheckResult {
                exit_code: last.exit_code,
                output: last.output,
            })
        })
    }

    fn exec_in_container(
        &self,
        container: RuntimeContainer,
        request: ExecRequest,
    ) -> RuntimeFuture<'_, ExecResult> {
        Box::pin(async move {
            let mut args: Vec<String> = vec!["exec".into()];
            for (name, value) in &request.environment {
                args.extend(["--env".into(), format!("{name}={value}")]);
            }
            if let Some(dir) = &request.working_directory {
                args.extend(["--workdir".into(), dir.clone()]);
            }
            if let Some(user) = &request.user {
                args.extend(["--user".into(), user_flag(user)]);
            }
            args.push(container.id.clone());
            args.extend(request.command);

            debug!(container = %container.name, "running exec");
            let output = self.command(&args).output().await?;
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));

            Ok(ExecResult {
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                output: combined,
            })
        })
    }

    fn run_container(
        &self,
        container: RuntimeContainer,
        io: ContainerIoStreaming,
        cancel: CancellationContext,
    ) -> RuntimeFuture<'_, i64> {
        Box::pin(async move {
            let mut cmd = self.command(["start", "--attach"]);
            if io.attach_stdin {
                cmd.arg("--interactive").stdin(Stdio::inherit());
            }
            cmd.arg(&container.id);

            match &io.output {
                OutputTarget::Inherit => {
                    cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
                }
                OutputTarget::Prefixed(_) => {
                    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
                }
                OutputTarget::Discard => {
                    cmd.stdout(Stdio::null()).stderr(Stdio::null());
                }
            }

            let mut child = cmd.spawn()?;
            let readers = match &io.output {
                OutputTarget::Prefixed(prefix) => forward_prefixed(&mut child, prefix),
                _ => Vec::new(),
            };

            let status = wait_or_cancel(&mut child, &cancel).await;
            drain(readers).await;
            status?;

            let state = self.inspect_state(&container).await?;
            Ok(state.exit_code)
        })
    }

    fn stop_container(&self, container: RuntimeContainer, grace_period: Duration) -> RuntimeFuture<'_, ()> {
        Box::pin(async move {
            self.output(vec![
                "stop".into(),
                "--time".into(),
                stop_timeout_secs(grace_period).to_string(),
                container.id,
            ])
            .await
            .map(drop)
        })
    }

    fn remove_container(&self, container: RuntimeContainer) -> RuntimeFuture<'_, ()> {
        Box::pin(async move {
            self.output(vec![
                "rm".into(),
                "--force".into(),
                "--volumes".into(),
                container.id,
            ])
            .await
            .map(drop)
        })
    }
}
