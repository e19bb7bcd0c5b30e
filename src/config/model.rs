// src/config/model.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Canonical container name type used throughout the engine.
pub type ContainerName = String;

/// Log driver used when a container does not override it.
pub const DEFAULT_LOG_DRIVER: &str = "json-file";

/// Validated, in-memory configuration.
///
/// This is what the rest of the crate consumes; it is produced from a
/// [`RawConfigFile`] by `TryFrom` (see `config::validate`) or assembled
/// directly by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub project_name: String,
    pub containers: BTreeMap<ContainerName, Container>,
    pub tasks: BTreeMap<String, Task>,
}

impl Configuration {
    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.get(name)
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Make relative build directories and local mount paths absolute.
    pub fn resolve_paths_relative_to(&mut self, base: &Path) {
        for container in self.containers.values_mut() {
            if let ImageSource::Build {
                build_directory, ..
            } = &mut container.image_source
                && build_directory.is_relative()
            {
                *build_directory = base.join(&*build_directory);
            }

            for mount in container.volume_mounts.iter_mut() {
                if let VolumeMount::Local { local_path, .. } = mount
                    && local_path.is_relative()
                {
                    *local_path = base.join(&*local_path);
                }
            }
        }
    }
}

/// Where a container's image comes from.
///
/// Two containers with equal sources share a single build or pull.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageSource {
    Build {
        build_directory: PathBuf,
        dockerfile: String,
        build_args: BTreeMap<String, String>,
    },
    Pull {
        image: String,
    },
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Build {
                build_directory,
                dockerfile,
                ..
            } => write!(f, "{} ({})", build_directory.display(), dockerfile),
            ImageSource::Pull { image } => write!(f, "{image}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct HealthCheckConfig {
    pub command: Option<String>,
    pub interval: Option<Duration>,
    pub retries: Option<u32>,
    pub start_period: Option<Duration>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RunAsCurrentUserConfig {
    #[default]
    RunAsDefaultContainerUser,
    RunAsCurrentUser { home_directory: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VolumeMount {
    Local {
        #[serde(rename = "local")]
        local_path: PathBuf,
        #[serde(rename = "container")]
        container_path: String,
        #[serde(default)]
        options: Option<String>,
    },
    Cache {
        name: String,
        #[serde(rename = "container")]
        container_path: String,
        #[serde(default)]
        options: Option<String>,
    },
}

impl VolumeMount {
    pub fn container_path(&self) -> &str {
        match self {
            VolumeMount::Local { container_path, .. } | VolumeMount::Cache { container_path, .. } => {
                container_path
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct PortMapping {
    pub local: u16,
    pub container: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl PortMapping {
    pub fn new(local: u16, container: u16) -> Self {
        Self {
            local,
            container,
            protocol: default_protocol(),
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.local, self.container, self.protocol)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct SetupCommand {
    pub command: String,
    #[serde(default)]
    pub working_directory: Option<String>,
}

/// A container definition. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Container {
    pub name: ContainerName,
    pub image_source: ImageSource,
    pub command: Option<String>,
    pub entrypoint: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub volume_mounts: Vec<VolumeMount>,
    pub port_mappings: Vec<PortMapping>,
    pub dependencies: BTreeSet<ContainerName>,
    pub health_check: HealthCheckConfig,
    pub run_as_current_user: RunAsCurrentUserConfig,
    pub privileged: bool,
    pub setup_commands: Vec<SetupCommand>,
    pub log_driver: String,
}

impl Container {
    /// Cache mounts as `(cache name, container path)` pairs.
    pub fn cache_mounts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.volume_mounts.iter().filter_map(|m| match m {
            VolumeMount::Cache {
                name,
                container_path,
                ..
            } => Some((name.as_str(), container_path.as_str())),
            VolumeMount::Local { .. } => None,
        })
    }

    pub fn has_cache_mounts(&self) -> bool {
        self.cache_mounts().next().is_some()
    }
}

/// What a task runs: the main container plus task-only customisations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskRunConfiguration {
    pub container: ContainerName,
    pub command: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub ports: Vec<PortMapping>,
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Task {
    pub name: String,
    pub description: Option<String>,
    pub group: Option<String>,
    /// `None` for tasks that only exist to run their prerequisites.
    pub run: Option<TaskRunConfiguration>,
    /// Extra containers started for this task only.
    pub dependencies: BTreeSet<ContainerName>,
    /// Tasks run (in order) before this one. May contain `*` wildcards.
    pub prerequisites: Vec<String>,
}

// ---------------------------------------------------------------------------
// Raw TOML representation.
// ---------------------------------------------------------------------------

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [project]
/// name = "my-project"
///
/// [container.db]
/// image = "postgres:16"
///
/// [container.app]
/// build_directory = "./app"
/// dependencies = ["db"]
///
/// [task.test]
/// run = { container = "app", command = "./test.sh" }
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub project: ProjectSection,

    #[serde(default)]
    pub container: BTreeMap<String, RawContainerConfig>,

    #[serde(default)]
    pub task: BTreeMap<String, RawTaskConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: Option<String>,
}

/// `[container.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawContainerConfig {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub build_directory: Option<String>,
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(default)]
    pub build_args: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub health_check: Option<RawHealthCheckConfig>,
    #[serde(default)]
    pub run_as_current_user: Option<RawRunAsCurrentUser>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub setup_commands: Vec<SetupCommand>,
    #[serde(default)]
    pub log_driver: Option<String>,
}

/// Durations are strings such as `"500ms"`, `"2s"` or `"1m"`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHealthCheckConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub start_period: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRunAsCurrentUser {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub home_directory: Option<String>,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTaskConfig {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub run: Option<RawTaskRunConfig>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTaskRunConfig {
    pub container: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub working_directory: Option<String>,
}
