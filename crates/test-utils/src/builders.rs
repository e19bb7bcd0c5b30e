#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use taskbox::config::model::{
    Configuration, Container, DEFAULT_LOG_DRIVER, HealthCheckConfig, ImageSource, PortMapping,
    RunAsCurrentUserConfig, SetupCommand, Task, TaskRunConfiguration, VolumeMount,
};

/// Builder for `Configuration` to simplify test setup.
///
/// Builds the model directly, so tests can also construct configurations
/// that validation would reject.
pub struct ConfigurationBuilder {
    config: Configuration,
}

impl ConfigurationBuilder {
    pub fn new(project_name: &str) -> Self {
        Self {
            config: Configuration {
                project_name: project_name.to_string(),
                containers: BTreeMap::new(),
                tasks: BTreeMap::new(),
            },
        }
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.config
            .containers
            .insert(container.name.clone(), container);
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.config.tasks.insert(task.name.clone(), task);
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}

impl Default for ConfigurationBuilder {
    fn default() -> Self {
        Self::new("project")
    }
}

/// Builder for `Container`. Pulls `alpine:3` unless told otherwise.
pub struct ContainerBuilder {
    container: Container,
}

impl ContainerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            container: Container {
                name: name.to_string(),
                image_source: ImageSource::Pull {
                    image: "alpine:3".to_string(),
                },
                command: None,
                entrypoint: None,
                environment: BTreeMap::new(),
                working_directory: None,
                volume_mounts: Vec::new(),
                port_mappings: Vec::new(),
                dependencies: BTreeSet::new(),
                health_check: HealthCheckConfig::default(),
                run_as_current_user: RunAsCurrentUserConfig::RunAsDefaultContainerUser,
                privileged: false,
                setup_commands: Vec::new(),
                log_driver: DEFAULT_LOG_DRIVER.to_string(),
            },
        }
    }

    pub fn image(mut self, image: &str) -> Self {
        self.container.image_source = ImageSource::Pull {
            image: image.to_string(),
        };
        self
    }

    pub fn build_directory(mut self, dir: &str) -> Self {
        self.container.image_source = ImageSource::Build {
            build_directory: PathBuf::from(dir),
            dockerfile: "Dockerfile".to_string(),
            build_args: BTreeMap::new(),
        };
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.container.command = Some(command.to_string());
        self
    }

    pub fn entrypoint(mut self, entrypoint: &str) -> Self {
        self.container.entrypoint = Some(entrypoint.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.container
            .environment
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn depends_on(mut self, dependency: &str) -> Self {
        self.container.dependencies.insert(dependency.to_string());
        self
    }

    pub fn port(mut self, local: u16, container: u16) -> Self {
        self.container
            .port_mappings
            .push(PortMapping::new(local, container));
        self
    }

    pub fn local_volume(mut self, local: &str, container: &str) -> Self {
        self.container.volume_mounts.push(VolumeMount::Local {
            local_path: PathBuf::from(local),
            container_path: container.to_string(),
            options: None,
        });
        self
    }

    pub fn cache(mut self, name: &str, container: &str) -> Self {
        self.container.volume_mounts.push(VolumeMount::Cache {
            name: name.to_string(),
            container_path: container.to_string(),
            options: None,
        });
        self
    }

    pub fn health_check(mut self, command: &str) -> Self {
        self.container.health_check = HealthCheckConfig {
            command: Some(command.to_string()),
            interval: Some(Duration::from_secs(1)),
            retries: Some(3),
            start_period: None,
            timeout: None,
        };
        self
    }

    pub fn setup_command(mut self, command: &str) -> Self {
        self.container.setup_commands.push(SetupCommand {
            command: command.to_string(),
            working_directory: None,
        });
        self
    }

    pub fn run_as_current_user(mut self, home_directory: &str) -> Self {
        self.container.run_as_current_user = RunAsCurrentUserConfig::RunAsCurrentUser {
            home_directory: home_directory.to_string(),
        };
        self
    }

    pub fn build(self) -> Container {
        self.container
    }
}

/// Builder for `Task`.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            task: Task {
                name: name.to_string(),
                ..Task::default()
            },
        }
    }

    /// Run `container` as the task's main container.
    pub fn runs(mut self, container: &str) -> Self {
        self.task.run = Some(TaskRunConfiguration {
            container: container.to_string(),
            ..TaskRunConfiguration::default()
        });
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        if let Some(run) = self.task.run.as_mut() {
            run.command = Some(command.to_string());
        }
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        if let Some(run) = self.task.run.as_mut() {
            run.environment.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn depends_on(mut self, container: &str) -> Self {
        self.task.dependencies.insert(container.to_string());
        self
    }

    pub fn prerequisite(mut self, task: &str) -> Self {
        self.task.prerequisites.push(task.to_string());
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.task.group = Some(group.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.task.description = Some(description.to_string());
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}
