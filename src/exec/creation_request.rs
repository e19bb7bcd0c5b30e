// src/exec/creation_request.rs

//! Runtime resource names and container creation requests.

use uuid::Uuid;

use crate::config::model::{Container, VolumeMount};
use crate::engine::events::{RuntimeImage, RuntimeNetwork};
use crate::engine::steps::ContainerRuntimeConfiguration;
use crate::exec::backend::{ContainerCreationRequest, MountSource, MountSpec};
use crate::exec::command_line;
use crate::exec::proxy::ProxyEnvironment;
use crate::exec::run_as_current_user::RunAsCurrentUserConfiguration;

/// Names of the runtime resources created for one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    project_name: String,
    task_name: String,
    suffix: String,
}

impl ResourceNames {
    /// Names with a fresh random suffix.
    pub fn new(project_name: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self::with_suffix(project_name, task_name, random_suffix())
    }

    pub fn with_suffix(
        project_name: impl Into<String>,
        task_name: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            task_name: task_name.into(),
            suffix: suffix.into(),
        }
    }

    pub fn container(&self, container: &str) -> String {
        format!("{}-{}-{}", self.project_name, container, self.suffix)
    }

    pub fn network(&self) -> String {
        format!("{}-{}-{}", self.project_name, self.task_name, self.suffix)
    }

    /// Caches outlive a single run, so their names carry no suffix.
    pub fn cache_volume(&self, cache: &str) -> String {
        format!("{}-cache-{}", self.project_name, cache)
    }
}

/// Eight hex characters from a v4 UUID.
fn random_suffix() -> String {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(8);
    suffix
}

/// Inputs for one creation request beyond the step itself.
#[derive(Debug, Clone, Copy)]
pub struct CreationContext<'a> {
    pub names: &'a ResourceNames,
    pub proxy: Option<&'a ProxyEnvironment>,
    pub attach_stdin: bool,
}

/// Assemble the runtime request for `container`.
///
/// Fails only when the command or entrypoint cannot be parsed.
pub fn build_creation_request(
    ctx: CreationContext<'_>,
    container: &Container,
    config: &ContainerRuntimeConfiguration,
    image: &RuntimeImage,
    network: &RuntimeNetwork,
    run_as: RunAsCurrentUserConfiguration,
) -> Result<ContainerCreationRequest, String> {
    let mut command = match &config.command {
        Some(command) => command_line::parse(command)?,
        None => Vec::new(),
    };
    command.extend(config.additional_arguments.iter().cloned());

    let entrypoint = match &config.entrypoint {
        Some(entrypoint) => command_line::parse(entrypoint)?,
        None => Vec::new(),
    };

    let mut environment = ctx
        .proxy
        .map(|proxy| proxy.for_container(&config.all_containers_in_network))
        .unwrap_or_default();
    environment.extend(config.environment.clone());

    let mut mounts: Vec<MountSpec> = container
        .volume_mounts
        .iter()
        .map(|mount| match mount {
            VolumeMount::Local {
                local_path,
                container_path,
                options,
            } => MountSpec {
                source: MountSource::HostPath(local_path.clone()),
                container_path: container_path.clone(),
                options: options.clone(),
            },
            VolumeMount::Cache {
                name,
                container_path,
                options,
            } => MountSpec {
                source: MountSource::Volume(ctx.names.cache_volume(name)),
                container_path: container_path.clone(),
                options: options.clone(),
            },
        })
        .collect();
    mounts.extend(run_as.mounts);

    Ok(ContainerCreationRequest {
        name: ctx.names.container(&container.name),
        hostname: container.name.clone(),
        image: image.clone(),
        network: network.clone(),
        network_aliases: vec![container.name.clone()],
        command,
        entrypoint,
        working_directory: config.working_directory.clone(),
        environment,
        mounts,
        port_mappings: config.port_mappings.clone(),
        health_check: container.health_check.clone(),
        user: run_as.user,
        privileged: container.privileged,
        log_driver: container.log_driver.clone(),
        attach_stdin: ctx.attach_stdin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{ImageSource, PortMapping};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn container() -> Container {
        Container {
            name: "app".to_string(),
            image_source: ImageSource::Pull {
                image: "alpine:3".to_string(),
            },
            command: None,
            entrypoint: None,
            environment: BTreeMap::new(),
            working_directory: None,
            volume_mounts: vec![
                VolumeMount::Local {
                    local_path: PathBuf::from("/src"),
                    container_path: "/code".to_string(),
                    options: Some("cached".to_string()),
                },
                VolumeMount::Cache {
                    name: "deps".to_string(),
                    container_path: "/deps".to_string(),
                    options: None,
                },
            ],
            port_mappings: Vec::new(),
            dependencies: Default::default(),
            health_check: Default::default(),
            run_as_current_user: Default::default(),
            privileged: false,
            setup_commands: Vec::new(),
            log_driver: "json-file".to_string(),
        }
    }

    #[test]
    fn names_follow_project_and_task() {
        let names = ResourceNames::with_suffix("proj", "build", "abc123");
        assert_eq!(names.container("db"), "proj-db-abc123");
        assert_eq!(names.network(), "proj-build-abc123");
        assert_eq!(names.cache_volume("deps"), "proj-cache-deps");
    }

    #[test]
    fn random_suffixes_are_short_hex_and_differ() {
        let first = ResourceNames::new("p", "t");
        let second = ResourceNames::new("p", "t");

        assert_ne!(first, second);
        assert_eq!(first.suffix.len(), 8);
        assert!(first.suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn request_merges_command_environment_and_mounts() {
        let names = ResourceNames::with_suffix("proj", "test", "s");
        let proxy = ProxyEnvironment::from_vars([
            ("http_proxy".to_string(), "http://proxy:3128".to_string()),
            ("CI".to_string(), "ignored".to_string()),
        ]);
        let config = ContainerRuntimeConfiguration {
            command: Some("sh -c 'echo hi'".to_string()),
            additional_arguments: vec!["--verbose".to_string()],
            environment: [("http_proxy".to_string(), "override".to_string())].into(),
            port_mappings: vec![PortMapping::new(8080, 80)],
            all_containers_in_network: ["app".to_string(), "db".to_string()].into(),
            ..Default::default()
        };

        let request = build_creation_request(
            CreationContext {
                names: &names,
                proxy: Some(&proxy),
                attach_stdin: true,
            },
            &container(),
            &config,
            &RuntimeImage { id: "img".into() },
            &RuntimeNetwork { id: "net".into() },
            RunAsCurrentUserConfiguration::default(),
        )
        .unwrap();

        assert_eq!(request.name, "proj-app-s");
        assert_eq!(request.hostname, "app");
        assert_eq!(request.network_aliases, ["app"]);
        assert_eq!(request.command, ["sh", "-c", "echo hi", "--verbose"]);
        assert_eq!(request.environment["http_proxy"], "override");
        assert_eq!(request.environment["HTTP_PROXY"], "http://proxy:3128");
        assert!(!request.environment.contains_key("CI"));
        assert_eq!(request.mounts[1].source, MountSource::Volume("proj-cache-deps".into()));
        assert!(request.attach_stdin);
    }

    #[test]
    fn unparseable_command_is_an_error() {
        let names = ResourceNames::with_suffix("proj", "test", "s");
        let config = ContainerRuntimeConfiguration {
            command: Some("echo 'unterminated".to_string()),
            ..Default::default()
        };
        let result = build_creation_request(
            CreationContext {
                names: &names,
                proxy: None,
                attach_stdin: false,
            },
            &container(),
            &config,
            &RuntimeImage { id: "img".into() },
            &RuntimeNetwork { id: "net".into() },
            RunAsCurrentUserConfiguration::default(),
        );
        assert!(result.unwrap_err().contains("unbalanced single quote"));
    }
}
