pub mod builders;
pub mod fake_runtime;

use std::sync::{Mutex, Once};

use taskbox::engine::events::TaskEvent;
use taskbox::ui::{EventLogger, TaskSummary};
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Keeps everything handed to it, in order.
#[derive(Default)]
pub struct RecordingEventLogger {
    started: Mutex<Vec<String>>,
    events: Mutex<Vec<TaskEvent>>,
    finished: Mutex<Vec<TaskSummary>>,
    failed: Mutex<Vec<TaskSummary>>,
}

impl RecordingEventLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<TaskSummary> {
        self.finished.lock().unwrap().clone()
    }

    pub fn failed(&self) -> Vec<TaskSummary> {
        self.failed.lock().unwrap().clone()
    }
}

impl EventLogger for RecordingEventLogger {
    fn on_task_starting(&self, task: &str) {
        self.started.lock().unwrap().push(task.to_string());
    }

    fn post_event(&self, event: &TaskEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn on_task_finished(&self, summary: &TaskSummary) {
        self.finished.lock().unwrap().push(summary.clone());
    }

    fn on_task_failed(&self, summary: &TaskSummary) {
        self.failed.lock().unwrap().push(summary.clone());
    }
}
