use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskbox::engine::events::{RuntimeContainer, RuntimeImage, RuntimeNetwork};
use taskbox::errors::RuntimeError;
use taskbox::exec::CancellationContext;
use taskbox::exec::backend::{
    CacheInitialisationRequest, ContainerCreationRequest, ContainerRuntime, ExecRequest,
    ExecResult, HealthCheckResult, HealthStatus, ImageBuildRequest, ProgressSink, RuntimeFuture,
};
use taskbox::exec::io::ContainerIoStreaming;

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    failing: BTreeSet<String>,
    health: BTreeMap<String, HealthStatus>,
    exec_results: BTreeMap<String, ExecResult>,
    creation_requests: Vec<ContainerCreationRequest>,
    exit_code: i64,
    block_run_until_cancelled: bool,
}

/// A fake container runtime that:
/// - records every call as a short string such as `"start_container db"`
/// - fails any call whose recorded string was registered with [`fail`](Self::fail)
/// - otherwise succeeds immediately
///
/// Containers are identified by their short name: the runtime id of a
/// created container is its hostname.
#[derive(Clone, Default)]
pub struct FakeContainerRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the call recorded as `call` fail.
    pub fn fail(self, call: &str) -> Self {
        self.state.lock().unwrap().failing.insert(call.to_string());
        self
    }

    pub fn health(self, container: &str, status: HealthStatus) -> Self {
        self.state
            .lock()
            .unwrap()
            .health
            .insert(container.to_string(), status);
        self
    }

    pub fn exec_result(self, container: &str, exit_code: i64, output: &str) -> Self {
        self.state.lock().unwrap().exec_results.insert(
            container.to_string(),
            ExecResult {
                exit_code,
                output: output.to_string(),
            },
        );
        self
    }

    /// Exit code returned by `run_container`.
    pub fn exit_code(self, exit_code: i64) -> Self {
        self.state.lock().unwrap().exit_code = exit_code;
        self
    }

    /// Make `run_container` wait for cancellation instead of returning.
    pub fn block_run_until_cancelled(self) -> Self {
        self.state.lock().unwrap().block_run_until_cancelled = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Recorded calls starting with `prefix`.
    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn was_called(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }

    /// Position of `call` in the recorded order.
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn creation_requests(&self) -> Vec<ContainerCreationRequest> {
        self.state.lock().unwrap().creation_requests.clone()
    }

    fn record(&self, call: String) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let fails = state.failing.contains(&call);
        state.calls.push(call.clone());
        if fails {
            Err(RuntimeError::failed(format!("{call} failed")))
        } else {
            Ok(())
        }
    }
}

impl ContainerRuntime for FakeContainerRuntime {
    fn build_image(
        &self,
        request: ImageBuildRequest,
        progress: ProgressSink,
        _cancel: CancellationContext,
    ) -> RuntimeFuture<'_, RuntimeImage> {
        Box::pin(async move {
            let dir = request.build_directory.display().to_string();
            self.record(format!("build_image {dir}"))?;
            progress.report("Step 1/1");
            Ok(RuntimeImage {
                id: format!("built-{dir}"),
            })
        })
    }

    fn pull_image(
        &self,
        image: String,
        progress: ProgressSink,
        _cancel: CancellationContext,
    ) -> RuntimeFuture<'_, RuntimeImage> {
        Box::pin(async move {
            self.record(format!("pull_image {image}"))?;
            progress.report("Pulling");
            Ok(RuntimeImage {
                id: format!("pulled-{image}"),
            })
        })
    }

    fn create_network(&self, name: String) -> RuntimeFuture<'_, RuntimeNetwork> {
        Box::pin(async move {
            self.record("create_network".to_string())?;
            Ok(RuntimeNetwork { id: name })
        })
    }

    fn delete_network(&self, _network: RuntimeNetwork) -> RuntimeFuture<'_, ()> {
        Box::pin(async move { self.record("delete_network".to_string()) })
    }

    fn initialise_cache(&self, request: CacheInitialisationRequest) -> RuntimeFuture<'_, ()> {
        Box::pin(async move { self.record(format!("initialise_cache {}", request.volume_name)) })
    }

    fn create_container(
        &self,
        request: ContainerCreationRequest,
    ) -> RuntimeFuture<'_, RuntimeContainer> {
        Box::pin(async move {
            self.record(format!("create_container {}", request.hostname))?;
            let container = RuntimeContainer {
                id: request.hostname.clone(),
                name: request.name.clone(),
            };
            self.state.lock().unwrap().creation_requests.push(request);
            Ok(container)
        })
    }

    fn start_container(
        &self,
        container: RuntimeContainer,
        _io: ContainerIoStreaming,
    ) -> RuntimeFuture<'_, ()> {
        Box::pin(async move { self.record(format!("start_container {}", container.id)) })
    }

    fn wait_for_health_status(
        &self,
        container: RuntimeContainer,
    ) -> RuntimeFuture<'_, HealthStatus> {
        Box::pin(async move {
            self.record(format!("wait_for_health {}", container.id))?;
            let status = self.state.lock().unwrap().health.get(&container.id).copied();
            Ok(status.unwrap_or(HealthStatus::NoHealthCheck))
        })
    }

    fn last_health_check_result(
        &self,
        container: RuntimeContainer,
    ) -> RuntimeFuture<'_, HealthCheckResult> {
        Box::pin(async move {
            self.record(format!("last_health_check_result {}", container.id))?;
            Ok(HealthCheckResult {
                exit_code: 1,
                output: "connection refused".to_string(),
            })
        })
    }

    fn exec_in_container(
        &self,
        container: RuntimeContainer,
        request: ExecRequest,
    ) -> RuntimeFuture<'_, ExecResult> {
        Box::pin(async move {
            self.record(format!("exec {} {}", container.id, request.command.join(" ")))?;
            let result = self.state.lock().unwrap().exec_results.get(&container.id).cloned();
            Ok(result.unwrap_or(ExecResult {
                exit_code: 0,
                output: String::new(),
            }))
        })
    }

    fn run_container(
        &self,
        container: RuntimeContainer,
        _io: ContainerIoStreaming,
        cancel: CancellationContext,
    ) -> RuntimeFuture<'_, i64> {
        Box::pin(async move {
            self.record(format!("run_container {}", container.id))?;
            let (block, exit_code) = {
                let state = self.state.lock().unwrap();
                (state.block_run_until_cancelled, state.exit_code)
            };
            if block {
                cancel.cancelled().await;
                return Err(RuntimeError::Cancelled);
            }
            Ok(exit_code)
        })
    }

    fn stop_container(
        &self,
        container: RuntimeContainer,
        _grace_period: Duration,
    ) -> RuntimeFuture<'_, ()> {
        Box::pin(async move { self.record(format!("stop_container {}", container.id)) })
    }

    fn remove_container(&self, container: RuntimeContainer) -> RuntimeFuture<'_, ()> {
        Box::pin(async move { self.record(format!("remove_container {}", container.id)) })
    }
}
