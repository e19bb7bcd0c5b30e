// tests/task_runner.rs

mod common;
use crate::common::*;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::{Duration, sleep};

use taskbox::config::model::Configuration;
use taskbox::engine::events::TaskEvent;
use taskbox::engine::state_machine::{FAILED_EXIT_CODE, TaskOutcome};
use taskbox::engine::task_runner::{TaskRunOptions, TaskRunner};
use taskbox::exec::CancellationContext;
use taskbox::exec::backend::{HealthStatus, MountSource, MountSpec, UserAndGroup};
use taskbox::exec::proxy::ProxyEnvironment;
use taskbox::exec::run_as_current_user::CurrentUser;
use taskbox::fs::mock::MockFileSystem;
use taskbox::types::CleanupOption;

type TestResult = Result<(), Box<dyn Error>>;

struct Harness {
    runtime: FakeContainerRuntime,
    fs: MockFileSystem,
    logger: Arc<RecordingEventLogger>,
    cancellation: CancellationContext,
}

impl Harness {
    fn new(runtime: FakeContainerRuntime) -> Self {
        init_tracing();
        Self {
            runtime,
            fs: MockFileSystem::new(),
            logger: Arc::new(RecordingEventLogger::new()),
            cancellation: CancellationContext::new(),
        }
    }

    fn runner(&self, config: Configuration, options: TaskRunOptions) -> TaskRunner {
        TaskRunner::new(
            Arc::new(config),
            Arc::new(self.runtime.clone()),
            Arc::new(self.fs.clone()),
            self.cancellation.clone(),
            options,
        )
        .with_proxy_environment(None)
        .with_current_user(CurrentUser {
            uid: 1000,
            gid: 1001,
            user_name: "dev".to_string(),
            group_name: "staff".to_string(),
        })
        .with_logger(self.logger.clone())
    }

    async fn run(&self, config: Configuration, task: &str) -> taskbox::errors::Result<i64> {
        self.run_with(config, task, TaskRunOptions::default()).await
    }

    async fn run_with(
        &self,
        config: Configuration,
        task: &str,
        options: TaskRunOptions,
    ) -> taskbox::errors::Result<i64> {
        with_timeout(self.runner(config, options).run_with_prerequisites(task)).await
    }
}

#[tokio::test]
async fn successful_task_returns_the_main_container_exit_code() -> TestResult {
    let h = Harness::new(FakeContainerRuntime::new().exit_code(7));

    let exit_code = h.run(shop_config(), "test").await?;

    assert_eq!(exit_code, 7);
    assert_eq!(h.logger.started(), ["test"]);
    assert_eq!(h.logger.finished().len(), 1);
    assert!(h.logger.failed().is_empty());

    for name in ["app", "db", "cache"] {
        assert!(h.runtime.was_called(&format!("remove_container {name}")), "{name}");
    }
    assert!(h.runtime.was_called("delete_network"));
    assert_eq!(h.runtime.calls_starting_with("build_image").len(), 1);
    Ok(())
}

#[tokio::test]
async fn dependencies_are_ready_before_the_main_container_runs() -> TestResult {
    let h = Harness::new(FakeContainerRuntime::new());

    h.run(shop_config(), "test").await?;

    let run = h.runtime.position("run_container app").expect("app ran");
    for call in [
        "start_container db",
        "wait_for_health db",
        "exec db ./migrate.sh",
        "start_container cache",
    ] {
        let position = h.runtime.position(call).unwrap_or_else(|| panic!("{call} missing"));
        assert!(position < run, "{call} happened after the main container ran");
    }
    assert!(!h.runtime.was_called("start_container app"));

    // Dependents stop before their dependencies.
    let stop_app = h.runtime.position("stop_container app").expect("app stopped");
    let stop_db = h.runtime.position("stop_container db").expect("db stopped");
    assert!(stop_app < stop_db);
    Ok(())
}

#[tokio::test]
async fn container_creation_failure_fails_the_task_and_cleans_up() -> TestResult {
    let h = Harness::new(FakeContainerRuntime::new().fail("create_container db"));

    let exit_code = h.run(shop_config(), "test").await?;

    assert_eq!(exit_code, FAILED_EXIT_CODE);
    assert!(!h.runtime.was_called("run_container app"));
    for name in ["app", "cache"] {
        if h.runtime.was_called(&format!("create_container {name}")) {
            assert!(h.runtime.was_called(&format!("remove_container {name}")), "{name}");
        }
    }
    assert!(h.runtime.was_called("delete_network"));

    let failed = h.logger.failed();
    assert_eq!(failed.len(), 1);
    let TaskOutcome::Failed { message } = &failed[0].outcome else {
        panic!("expected a failed outcome, got {:?}", failed[0].outcome);
    };
    assert!(message.starts_with("Could not create container 'db'"), "{message}");
    Ok(())
}

#[tokio::test]
async fn unhealthy_dependency_reports_the_last_health_check() -> TestResult {
    let h = Harness::new(FakeContainerRuntime::new().health("db", HealthStatus::BecameUnhealthy));

    let exit_code = h.run(shop_config(), "test").await?;

    assert_eq!(exit_code, FAILED_EXIT_CODE);
    assert!(h.runtime.was_called("last_health_check_result db"));
    let TaskOutcome::Failed { message } = &h.logger.failed()[0].outcome else {
        panic!("expected a failed outcome");
    };
    assert!(message.contains("Container 'db' did not become healthy"), "{message}");
    assert!(message.contains("connection refused"), "{message}");
    Ok(())
}

#[tokio::test]
async fn failing_setup_command_fails_the_task() -> TestResult {
    let h = Harness::new(FakeContainerRuntime::new().exec_result("db", 2, "relation exists"));

    let exit_code = h.run(shop_config(), "test").await?;

    assert_eq!(exit_code, FAILED_EXIT_CODE);
    assert!(!h.runtime.was_called("run_container app"));
    assert!(h
        .logger
        .events()
        .iter()
        .any(|e| matches!(e, TaskEvent::SetupCommandFailed { exit_code: 2, .. })));
    Ok(())
}

#[tokio::test]
async fn interrupt_stops_the_run_and_cleans_up() -> TestResult {
    let h = Harness::new(FakeContainerRuntime::new().block_run_until_cancelled());
    let runner = h.runner(shop_config(), TaskRunOptions::default());

    let cancel = {
        let runtime = h.runtime.clone();
        let cancellation = h.cancellation.clone();
        async move {
            while !runtime.was_called("run_container app") {
                sleep(Duration::from_millis(5)).await;
            }
            cancellation.cancel();
        }
    };

    let (exit_code, ()) = with_timeout(async {
        tokio::join!(runner.run_with_prerequisites("test"), cancel)
    })
    .await;

    assert_eq!(exit_code?, FAILED_EXIT_CODE);
    assert!(h.runtime.was_called("stop_container app"));
    assert!(h.runtime.was_called("remove_container app"));
    assert!(h.runtime.was_called("delete_network"));
    assert_eq!(h.logger.failed()[0].outcome, TaskOutcome::Interrupted);
    assert!(h
        .logger
        .events()
        .iter()
        .any(|e| matches!(e, TaskEvent::UserInterruptedExecution)));
    Ok(())
}

#[tokio::test]
async fn cancellation_before_start_runs_nothing() -> TestResult {
    let h = Harness::new(FakeContainerRuntime::new());
    h.cancellation.cancel();

    let exit_code = h.run(shop_config(), "test").await?;

    assert_eq!(exit_code, FAILED_EXIT_CODE);
    assert!(h.runtime.calls_starting_with("create_container").is_empty());
    Ok(())
}

#[tokio::test]
async fn run_as_current_user_files_are_mounted_then_deleted() -> TestResult {
    let config = ConfigurationBuilder::new("shop")
        .with_container(
            ContainerBuilder::new("app")
                .local_volume("/work/src", "/code")
                .run_as_current_user("/home/dev")
                .build(),
        )
        .with_task(TaskBuilder::new("t").runs("app").build())
        .build();
    let h = Harness::new(FakeContainerRuntime::new());

    assert_eq!(h.run(config, "t").await?, 0);

    let request = h
        .runtime
        .creation_requests()
        .into_iter()
        .find(|r| r.hostname == "app")
        .expect("app was created");
    assert_eq!(request.user, Some(UserAndGroup { uid: 1000, gid: 1001 }));
    let paths: Vec<&str> = request.mounts.iter().map(|m| m.container_path.as_str()).collect();
    assert!(paths.contains(&"/etc/passwd"));
    assert!(paths.contains(&"/etc/group"));
    assert!(paths.contains(&"/home/dev"));
    assert!(request.mounts.contains(&MountSpec {
        source: MountSource::HostPath(PathBuf::from("/work/src")),
        container_path: "/code".to_string(),
        options: None,
    }));

    assert!(h.fs.paths().is_empty(), "left behind: {:?}", h.fs.paths());
    Ok(())
}

#[tokio::test]
async fn undeletable_temporary_file_fails_cleanup() -> TestResult {
    let config = ConfigurationBuilder::new("shop")
        .with_container(
            ContainerBuilder::new("app")
                .run_as_current_user("/home/dev")
                .build(),
        )
        .with_task(TaskBuilder::new("t").runs("app").build())
        .build();
    let h = Harness::new(FakeContainerRuntime::new());
    // The mock hands out sequential paths; the passwd file comes first.
    h.fs.fail_removal_of("/mock-tmp/taskbox-app-passwd-1");

    let exit_code = h.run(config, "t").await?;

    assert_eq!(exit_code, FAILED_EXIT_CODE);
    let failed = h.logger.failed();
    assert_eq!(failed[0].outcome, TaskOutcome::Succeeded { exit_code: 0 });
    assert_eq!(failed[0].supplementary_failures.len(), 1);
    Ok(())
}

#[tokio::test]
async fn caches_are_initialised_before_containers_are_created() -> TestResult {
    let config = ConfigurationBuilder::new("shop")
        .with_container(ContainerBuilder::new("app").cache("cargo", "/root/.cargo").build())
        .with_task(TaskBuilder::new("t").runs("app").build())
        .build();
    let h = Harness::new(FakeContainerRuntime::new());

    h.run(config, "t").await?;

    let init = h.runtime.position("initialise_cache shop-cache-cargo").expect("cache initialised");
    let create = h.runtime.position("create_container app").expect("app created");
    assert!(init < create);
    Ok(())
}

#[tokio::test]
async fn prerequisites_run_in_order_and_stop_at_the_first_failure() -> TestResult {
    let h = Harness::new(FakeContainerRuntime::new());
    assert_eq!(h.run(shop_config(), "ci").await?, 0);
    assert_eq!(h.logger.started(), ["lint", "test"]);

    let h = Harness::new(FakeContainerRuntime::new().exit_code(2));
    assert_eq!(h.run(shop_config(), "ci").await?, 2);
    assert_eq!(h.logger.started(), ["lint"]);
    Ok(())
}

#[tokio::test]
async fn additional_arguments_only_go_to_the_requested_task() -> TestResult {
    let config = ConfigurationBuilder::new("shop")
        .with_container(ContainerBuilder::new("app").build())
        .with_task(TaskBuilder::new("lint").runs("app").command("lint").build())
        .with_task(
            TaskBuilder::new("test")
                .runs("app")
                .command("test")
                .prerequisite("lint")
                .build(),
        )
        .build();
    let h = Harness::new(FakeContainerRuntime::new());
    let options = TaskRunOptions {
        additional_arguments: vec!["--verbose".to_string()],
        ..TaskRunOptions::default()
    };

    h.run_with(config, "test", options).await?;

    let commands: Vec<Vec<String>> = h
        .runtime
        .creation_requests()
        .into_iter()
        .map(|r| r.command)
        .collect();
    assert_eq!(commands, [vec!["lint".to_string()], vec!["test".to_string(), "--verbose".to_string()]]);
    Ok(())
}

#[tokio::test]
async fn parallelism_of_one_still_completes() -> TestResult {
    let h = Harness::new(FakeContainerRuntime::new());
    let options = TaskRunOptions {
        max_parallelism: 1,
        ..TaskRunOptions::default()
    };

    assert_eq!(h.run_with(shop_config(), "test", options).await?, 0);
    Ok(())
}

#[tokio::test]
async fn no_cleanup_after_failure_leaves_containers_running() -> TestResult {
    let h = Harness::new(FakeContainerRuntime::new().exec_result("db", 1, ""));
    let options = TaskRunOptions {
        cleanup_after_failure: CleanupOption::DontCleanup,
        ..TaskRunOptions::default()
    };

    let exit_code = h.run_with(shop_config(), "test", options).await?;

    assert_eq!(exit_code, FAILED_EXIT_CODE);
    assert!(h.runtime.calls_starting_with("stop_container").is_empty());
    assert!(h.runtime.calls_starting_with("remove_container").is_empty());
    assert!(!h.runtime.was_called("delete_network"));
    Ok(())
}

#[tokio::test]
async fn proxy_variables_reach_containers() -> TestResult {
    let config = ConfigurationBuilder::new("shop")
        .with_container(ContainerBuilder::new("app").env("HTTP_PROXY", "http://override").build())
        .with_task(TaskBuilder::new("t").runs("app").build())
        .build();
    let h = Harness::new(FakeContainerRuntime::new());
    let proxy = ProxyEnvironment::from_vars([
        ("HTTPS_PROXY".to_string(), "http://proxy:3128".to_string()),
        ("HTTP_PROXY".to_string(), "http://proxy:3128".to_string()),
    ]);
    let runner = h
        .runner(config, TaskRunOptions::default())
        .with_proxy_environment(Some(proxy));

    with_timeout(runner.run_with_prerequisites("t")).await?;

    let env = &h.runtime.creation_requests()[0].environment;
    assert_eq!(env.get("https_proxy").map(String::as_str), Some("http://proxy:3128"));
    // Container configuration wins over the host.
    assert_eq!(env.get("HTTP_PROXY").map(String::as_str), Some("http://override"));
    Ok(())
}
