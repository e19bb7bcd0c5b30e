// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::model::{
    Configuration, Container, DEFAULT_LOG_DRIVER, HealthCheckConfig, ImageSource, RawConfigFile,
    RawContainerConfig, RawHealthCheckConfig, RawRunAsCurrentUser, RawTaskConfig,
    RunAsCurrentUserConfig, Task, TaskRunConfiguration,
};
use crate::errors::{Result, TaskboxError};

/// Project name used when `[project].name` is not set.
pub const DEFAULT_PROJECT_NAME: &str = "taskbox";

const DEFAULT_DOCKERFILE: &str = "Dockerfile";

impl TryFrom<RawConfigFile> for Configuration {
    type Error = crate::errors::TaskboxError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let project_name = raw
            .project
            .name
            .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string());

        let containers = raw
            .container
            .into_iter()
            .map(|(name, c)| convert_container(&name, c).map(|c| (name, c)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let tasks = raw
            .task
            .into_iter()
            .map(|(name, t)| {
                let task = convert_task(&name, t);
                (name, task)
            })
            .collect();

        Ok(Configuration {
            project_name,
            containers,
            tasks,
        })
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_project_name(cfg)?;
    validate_tasks(cfg)?;
    validate_container_paths(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(TaskboxError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_project_name(cfg: &RawConfigFile) -> Result<()> {
    if let Some(name) = cfg.project.name.as_deref() {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "-_.".contains(c));
        if !valid {
            return Err(TaskboxError::ConfigError(format!(
                "[project].name '{name}' must be non-empty and only contain lowercase letters, digits, '-', '_' or '.'"
            )));
        }
    }
    Ok(())
}

/// Dependency and prerequisite names are resolved later, per task, so that
/// errors can name the task being run.
fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if task.run.is_none() && task.prerequisites.is_empty() {
            return Err(TaskboxError::ConfigError(format!(
                "task '{name}' must set at least one of `run` or `prerequisites`"
            )));
        }
        if task.run.is_none() && !task.dependencies.is_empty() {
            return Err(TaskboxError::ConfigError(format!(
                "task '{name}' sets `dependencies` without `run`"
            )));
        }
    }
    Ok(())
}

fn validate_container_paths(cfg: &RawConfigFile) -> Result<()> {
    for (name, container) in cfg.container.iter() {
        for mount in container.volumes.iter() {
            if !mount.container_path().starts_with('/') {
                return Err(TaskboxError::ConfigError(format!(
                    "container '{}' mounts a volume at relative path '{}'",
                    name,
                    mount.container_path()
                )));
            }
        }

        if let Some(home) = container
            .run_as_current_user
            .as_ref()
            .and_then(|r| r.home_directory.as_deref())
            && !home.starts_with('/')
        {
            return Err(TaskboxError::ConfigError(format!(
                "container '{name}' has relative run_as_current_user.home_directory '{home}'"
            )));
        }
    }
    Ok(())
}

fn convert_container(name: &str, raw: RawContainerConfig) -> Result<Container> {
    let image_source = match (raw.image, raw.build_directory) {
        (Some(image), None) => {
            if raw.dockerfile.is_some() || raw.build_args.is_some() {
                return Err(TaskboxError::ConfigError(format!(
                    "container '{name}' sets `dockerfile` or `build_args` without `build_directory`"
                )));
            }
            ImageSource::Pull { image }
        }
        (None, Some(dir)) => ImageSource::Build {
            build_directory: PathBuf::from(dir),
            dockerfile: raw
                .dockerfile
                .unwrap_or_else(|| DEFAULT_DOCKERFILE.to_string()),
            build_args: raw.build_args.unwrap_or_default(),
        },
        (Some(_), Some(_)) => {
            return Err(TaskboxError::ConfigError(format!(
                "container '{name}' must set only one of `image` or `build_directory`"
            )));
        }
        (None, None) => {
            return Err(TaskboxError::ConfigError(format!(
                "container '{name}' must set one of `image` or `build_directory`"
            )));
        }
    };

    let health_check = raw
        .health_check
        .map(|h| convert_health_check(name, h))
        .transpose()?
        .unwrap_or_default();

    Ok(Container {
        name: name.to_string(),
        image_source,
        command: raw.command,
        entrypoint: raw.entrypoint,
        environment: raw.environment,
        working_directory: raw.working_directory,
        volume_mounts: raw.volumes,
        port_mappings: raw.ports,
        dependencies: raw.dependencies.into_iter().collect(),
        health_check,
        run_as_current_user: convert_run_as_current_user(name, raw.run_as_current_user)?,
        privileged: raw.privileged,
        setup_commands: raw.setup_commands,
        log_driver: raw
            .log_driver
            .unwrap_or_else(|| DEFAULT_LOG_DRIVER.to_string()),
    })
}

fn convert_health_check(container: &str, raw: RawHealthCheckConfig) -> Result<HealthCheckConfig> {
    let field = |label: &str, value: Option<String>| -> Result<Option<Duration>> {
        value
            .map(|v| {
                parse_duration(&v).map_err(|e| {
                    TaskboxError::ConfigError(format!(
                        "container '{container}' has invalid health_check.{label}: {e}"
                    ))
                })
            })
            .transpose()
    };

    Ok(HealthCheckConfig {
        command: raw.command,
        interval: field("interval", raw.interval)?,
        retries: raw.retries,
        start_period: field("start_period", raw.start_period)?,
        timeout: field("timeout", raw.timeout)?,
    })
}

fn convert_run_as_current_user(
    container: &str,
    raw: Option<RawRunAsCurrentUser>,
) -> Result<RunAsCurrentUserConfig> {
    match raw {
        None
        | Some(RawRunAsCurrentUser {
            enabled: false,
            home_directory: None,
        }) => Ok(RunAsCurrentUserConfig::RunAsDefaultContainerUser),
        Some(RawRunAsCurrentUser {
            enabled: false,
            home_directory: Some(_),
        }) => Err(TaskboxError::ConfigError(format!(
            "container '{container}' sets run_as_current_user.home_directory but run as current user is not enabled"
        ))),
        Some(RawRunAsCurrentUser {
            enabled: true,
            home_directory: None,
        }) => Err(TaskboxError::ConfigError(format!(
            "container '{container}' enables run_as_current_user but does not set home_directory"
        ))),
        Some(RawRunAsCurrentUser {
            enabled: true,
            home_directory: Some(home_directory),
        }) => Ok(RunAsCurrentUserConfig::RunAsCurrentUser { home_directory }),
    }
}

fn convert_task(name: &str, raw: RawTaskConfig) -> Task {
    Task {
        name: name.to_string(),
        description: raw.description,
        group: raw.group,
        run: raw.run.map(|r| TaskRunConfiguration {
            container: r.container,
            command: r.command,
            environment: r.environment,
            ports: r.ports,
            working_directory: r.working_directory,
        }),
        dependencies: raw.dependencies.into_iter().collect::<BTreeSet<_>>(),
        prerequisites: raw.prerequisites,
    }
}

/// Parse durations like `"500ms"`, `"10s"`, `"2m"` or `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}
