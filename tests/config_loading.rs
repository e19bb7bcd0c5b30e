// tests/config_loading.rs

mod common;
use crate::common::*;

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;

use taskbox::config::loader::load_and_validate;
use taskbox::config::model::{ImageSource, PortMapping, RunAsCurrentUserConfig, VolumeMount};
use taskbox::errors::TaskboxError;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(contents: &str) -> Result<(TempDir, PathBuf), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("taskbox.toml");
    fs::write(&path, contents)?;
    Ok((dir, path))
}

const FULL_CONFIG: &str = r#"
[project]
name = "shop"

[container.db]
image = "postgres:16"
environment = { POSTGRES_PASSWORD = "secret" }
health_check = { command = "pg_isready", interval = "500ms", retries = 5, start_period = "2s" }
setup_commands = [{ command = "./migrate.sh", working_directory = "/migrations" }]

[container.app]
build_directory = "app"
build_args = { RUST_VERSION = "1.85" }
dependencies = ["db"]
ports = [{ local = 8080, container = 80 }]
volumes = [
    { type = "local", local = "src", container = "/code/src", options = "cached" },
    { type = "cache", name = "cargo", container = "/root/.cargo" },
]
run_as_current_user = { enabled = true, home_directory = "/home/dev" }

[task.test]
description = "Run the tests"
group = "Test"
run = { container = "app", command = "cargo test", environment = { CI = "1" } }

[task.ci]
prerequisites = ["test"]
"#;

#[test]
fn full_config_is_loaded_and_paths_are_resolved() -> TestResult {
    init_tracing();
    let (dir, path) = write_config(FULL_CONFIG)?;

    let config = load_and_validate(&path)?;

    assert_eq!(config.project_name, "shop");

    let app = config.container("app").expect("app exists");
    assert_eq!(
        app.image_source,
        ImageSource::Build {
            build_directory: dir.path().join("app"),
            dockerfile: "Dockerfile".to_string(),
            build_args: [("RUST_VERSION".to_string(), "1.85".to_string())].into(),
        }
    );
    assert_eq!(app.port_mappings, [PortMapping::new(8080, 80)]);
    assert_eq!(
        app.volume_mounts[0],
        VolumeMount::Local {
            local_path: dir.path().join("src"),
            container_path: "/code/src".to_string(),
            options: Some("cached".to_string()),
        }
    );
    assert!(app.has_cache_mounts());
    assert_eq!(
        app.run_as_current_user,
        RunAsCurrentUserConfig::RunAsCurrentUser {
            home_directory: "/home/dev".to_string()
        }
    );

    let db = config.container("db").expect("db exists");
    assert_eq!(db.health_check.interval, Some(Duration::from_millis(500)));
    assert_eq!(db.health_check.start_period, Some(Duration::from_secs(2)));
    assert_eq!(db.health_check.retries, Some(5));
    assert_eq!(db.setup_commands[0].working_directory.as_deref(), Some("/migrations"));
    assert_eq!(db.log_driver, "json-file");

    let test = config.task("test").expect("test exists");
    let run = test.run.as_ref().expect("test runs a container");
    assert_eq!(run.command.as_deref(), Some("cargo test"));
    assert_eq!(test.group.as_deref(), Some("Test"));
    assert!(config.task("ci").is_some_and(|t| t.run.is_none()));
    Ok(())
}

#[test]
fn project_name_defaults_when_not_set() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[container.app]
image = "alpine:3"

[task.t]
run = { container = "app" }
"#,
    )?;

    assert_eq!(load_and_validate(&path)?.project_name, "taskbox");
    Ok(())
}

fn config_error(contents: &str) -> String {
    let (_dir, path) = write_config(contents).expect("config written");
    match load_and_validate(&path) {
        Err(TaskboxError::ConfigError(message)) => message,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn invalid_configs_are_rejected_with_a_reason() {
    let cases = [
        (
            "[container.app]\nimage = \"a\"\n",
            "at least one [task.<name>] section",
        ),
        (
            "[project]\nname = \"Shop\"\n[task.t]\nprerequisites = [\"x\"]\n",
            "[project].name 'Shop'",
        ),
        ("[task.t]\ndescription = \"nothing\"\n", "task 't' must set at least one"),
        (
            "[container.app]\nimage = \"a\"\nbuild_directory = \"b\"\n[task.t]\nrun = { container = \"app\" }\n",
            "only one of `image` or `build_directory`",
        ),
        (
            "[container.app]\n[task.t]\nrun = { container = \"app\" }\n",
            "one of `image` or `build_directory`",
        ),
        (
            "[container.app]\nimage = \"a\"\nvolumes = [{ type = \"local\", local = \".\", container = \"rel\" }]\n[task.t]\nrun = { container = \"app\" }\n",
            "relative path 'rel'",
        ),
        (
            "[container.app]\nimage = \"a\"\nrun_as_current_user = { enabled = true }\n[task.t]\nrun = { container = \"app\" }\n",
            "does not set home_directory",
        ),
        (
            "[container.app]\nimage = \"a\"\nhealth_check = { interval = \"soon\" }\n[task.t]\nrun = { container = \"app\" }\n",
            "invalid health_check.interval",
        ),
    ];

    for (contents, expected) in cases {
        let message = config_error(contents);
        assert!(message.contains(expected), "{message:?} should mention {expected:?}");
    }
}

#[test]
fn malformed_toml_is_a_parse_error() -> TestResult {
    let (_dir, path) = write_config("[task.t\nrun = ")?;
    assert!(matches!(load_and_validate(&path), Err(TaskboxError::TomlError(_))));
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let result = load_and_validate(dir.path().join("nope.toml"));
    assert!(matches!(result, Err(TaskboxError::IoError(_))));
}
