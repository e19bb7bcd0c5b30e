// src/exec/backend.rs

//! Pluggable container runtime abstraction.
//!
//! Step runners talk to a `ContainerRuntime` instead of a concrete client.
//! Production code uses [`crate::exec::docker_cli::DockerCliRuntime`]; tests
//! provide a fake that records calls and returns scripted results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::model::{HealthCheckConfig, PortMapping};
use crate::engine::events::{RuntimeContainer, RuntimeImage, RuntimeNetwork};
use crate::errors::RuntimeError;
use crate::exec::cancellation::CancellationContext;
use crate::exec::io::ContainerIoStreaming;

pub type RuntimeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RuntimeError>> + Send + 'a>>;

/// Receives progress lines from long-running runtime calls.
#[derive(Clone)]
pub struct ProgressSink(Arc<dyn Fn(String) + Send + Sync>);

impl ProgressSink {
    pub fn new(f: impl Fn(String) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, message: impl Into<String>) {
        (self.0)(message.into())
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserAndGroup {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuildRequest {
    pub build_directory: PathBuf,
    pub dockerfile: String,
    pub build_args: BTreeMap<String, String>,
    pub image_tags: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInitialisationRequest {
    pub volume_name: String,
    /// Owner of the cache root when the containers using it run as the
    /// current user.
    pub owner: Option<UserAndGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountSource {
    HostPath(PathBuf),
    Volume(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub source: MountSource,
    pub container_path: String,
    pub options: Option<String>,
}

/// Everything the runtime needs to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCreationRequest {
    pub name: String,
    pub hostname: String,
    pub image: RuntimeImage,
    pub network: RuntimeNetwork,
    pub network_aliases: Vec<String>,
    pub command: Vec<String>,
    pub entrypoint: Vec<String>,
    pub working_directory: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub port_mappings: Vec<PortMapping>,
    pub health_check: HealthCheckConfig,
    pub user: Option<UserAndGroup>,
    pub privileged: bool,
    pub log_driver: String,
    pub attach_stdin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    NoHealthCheck,
    BecameHealthy,
    BecameUnhealthy,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckResult {
    pub exit_code: i64,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub user: Option<UserAndGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i64,
    pub output: String,
}

/// Trait abstracting the container engine.
///
/// Every call is fallible. Arguments are owned so implementations can move
/// them into the returned future.
pub trait ContainerRuntime: Send + Sync {
    fn build_image(
        &self,
        request: ImageBuildRequest,
        progress: ProgressSink,
        cancel: CancellationContext,
    ) -> RuntimeFuture<'_, RuntimeImage>;

    fn pull_image(
        &self,
        image: String,
        progress: ProgressSink,
        cancel: CancellationContext,
    ) -> RuntimeFuture<'_, RuntimeImage>;

    fn create_network(&self, name: String) -> RuntimeFuture<'_, RuntimeNetwork>;

    fn delete_network(&self, network: RuntimeNetwork) -> RuntimeFuture<'_, ()>;

    fn initialise_cache(&self, request: CacheInitialisationRequest) -> RuntimeFuture<'_, ()>;

    fn create_container(
        &self,
        request: ContainerCreationRequest,
    ) -> RuntimeFuture<'_, RuntimeContainer>;

    fn start_container(
        &self,
        container: RuntimeContainer,
        io: ContainerIoStreaming,
    ) -> RuntimeFuture<'_, ()>;

    /// Block until the container's health check settles.
    fn wait_for_health_status(&self, container: RuntimeContainer) -> RuntimeFuture<'_, HealthStatus>;

    fn last_health_check_result(
        &self,
        container: RuntimeContainer,
    ) -> RuntimeFuture<'_, HealthCheckResult>;

    fn exec_in_container(
        &self,
        container: RuntimeContainer,
        request: ExecRequest,
    ) -> RuntimeFuture<'_, ExecResult>;

    /// Start the container attached to `io` and wait for it to exit.
    fn run_container(
        &self,
        container: RuntimeContainer,
        io: ContainerIoStreaming,
        cancel: CancellationContext,
    ) -> RuntimeFuture<'_, i64>;

    /// Stop with a grace period, then force-kill.
    fn stop_container(&self, container: RuntimeContainer, grace_period: Duration) -> RuntimeFuture<'_, ()>;

    fn remove_container(&self, container: RuntimeContainer) -> RuntimeFuture<'_, ()>;
}
