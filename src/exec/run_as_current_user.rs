// src/exec/run_as_current_user.rs

//! Identity mapping for containers that run as the invoking user.
//!
//! The container gets generated `/etc/passwd` and `/etc/group` files that
//! describe the host user, plus a fresh home directory, so tools inside the
//! container see a sensible user and files created on bind mounts are owned
//! by the host user.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::model::{Container, RunAsCurrentUserConfig};
use crate::engine::events::TaskEvent;
use crate::exec::backend::{MountSource, MountSpec, UserAndGroup};
use crate::exec::step_runner::TaskEventSink;
use crate::fs::FileSystem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub uid: u32,
    pub gid: u32,
    pub user_name: String,
    pub group_name: String,
}

impl CurrentUser {
    /// Determine the user running this process.
    ///
    /// The ids come from the owner of a freshly created file, which is the
    /// effective user and group.
    #[cfg(unix)]
    pub fn detect() -> Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let file = tempfile::tempfile().context("creating probe file for current user")?;
        let metadata = file
            .metadata()
            .context("reading probe file metadata for current user")?;
        let (uid, gid) = (metadata.uid(), metadata.gid());

        let user_name = if uid == 0 {
            "root".to_string()
        } else {
            std::env::var("USER")
                .or_else(|_| std::env::var("LOGNAME"))
                .unwrap_or_else(|_| format!("user{uid}"))
        };
        let group_name = if gid == 0 {
            "root".to_string()
        } else {
            user_name.clone()
        };

        Ok(Self {
            uid,
            gid,
            user_name,
            group_name,
        })
    }

    #[cfg(not(unix))]
    pub fn detect() -> Result<Self> {
        anyhow::bail!("running containers as the current user is only supported on Unix-like hosts")
    }

    pub fn user_and_group(&self) -> UserAndGroup {
        UserAndGroup {
            uid: self.uid,
            gid: self.gid,
        }
    }

    pub fn passwd_file_contents(&self, home_directory: &str) -> String {
        if self.uid == 0 {
            return format!("root:x:0:0:root:{home_directory}:/bin/sh\n");
        }

        format!(
            "root:x:0:0:root:/root:/bin/sh\n{user}:x:{uid}:{gid}:{user}:{home_directory}:/bin/sh\n",
            user = self.user_name,
            uid = self.uid,
            gid = self.gid,
        )
    }

    pub fn group_file_contents(&self) -> String {
        if self.gid == 0 {
            return "root:x:0:root\n".to_string();
        }

        format!(
            "root:x:0:root\n{}:x:{}:{}\n",
            self.group_name, self.gid, self.user_name
        )
    }
}

/// What a container needs to run as the current user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunAsCurrentUserConfiguration {
    pub user: Option<UserAndGroup>,
    pub mounts: Vec<MountSpec>,
}

/// The uid/gid a container runs as, without creating any files.
pub fn determine_user_and_group(
    container: &Container,
    current_user: Option<&CurrentUser>,
) -> Option<UserAndGroup> {
    match container.run_as_current_user {
        RunAsCurrentUserConfig::RunAsDefaultContainerUser => None,
        RunAsCurrentUserConfig::RunAsCurrentUser { .. } => {
            current_user.map(CurrentUser::user_and_group)
        }
    }
}

/// Create the passwd, group and home directory for `container`.
///
/// Each created path is reported through `events` as soon as it exists, so
/// cleanup knows about it even if a later step here fails.
pub fn generate_configuration(
    container: &Container,
    current_user: Option<&CurrentUser>,
    fs: &dyn FileSystem,
    events: &TaskEventSink,
) -> Result<RunAsCurrentUserConfiguration> {
    let home_directory = match &container.run_as_current_user {
        RunAsCurrentUserConfig::RunAsDefaultContainerUser => {
            return Ok(RunAsCurrentUserConfiguration::default());
        }
        RunAsCurrentUserConfig::RunAsCurrentUser { home_directory } => home_directory,
    };

    let user = current_user.context("the current user could not be determined")?;

    let passwd = fs.create_temp_file(
        &format!("taskbox-{}-passwd-", container.name),
        user.passwd_file_contents(home_directory).as_bytes(),
    )?;
    post_file_created(events, container, passwd.clone());

    let group = fs.create_temp_file(
        &format!("taskbox-{}-group-", container.name),
        user.group_file_contents().as_bytes(),
    )?;
    post_file_created(events, container, group.clone());

    let home = fs.create_temp_dir(&format!("taskbox-{}-home-", container.name))?;
    events.post(TaskEvent::TemporaryDirectoryCreated {
        container: Some(container.name.clone()),
        path: home.clone(),
    });

    Ok(RunAsCurrentUserConfiguration {
        user: Some(user.user_and_group()),
        mounts: vec![
            read_only_mount(passwd, "/etc/passwd"),
            read_only_mount(group, "/etc/group"),
            MountSpec {
                source: MountSource::HostPath(home),
                container_path: home_directory.clone(),
                options: Some("delegated".to_string()),
            },
        ],
    })
}

fn post_file_created(events: &TaskEventSink, container: &Container, path: PathBuf) {
    events.post(TaskEvent::TemporaryFileCreated {
        container: Some(container.name.clone()),
        path,
    });
}

fn read_only_mount(path: PathBuf, container_path: &str) -> MountSpec {
    MountSpec {
        source: MountSource::HostPath(path),
        container_path: container_path.to_string(),
        options: Some("ro".to_string()),
    }
}
