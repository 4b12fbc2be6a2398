//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code never blocks a runtime thread with
//! `std::thread::sleep`. Async sleeps are allowed only where a delay is the
//! behavior itself:
//! - the race-loss retry delay in the coordinator
//! - the accept-error backoff in the host
//! - simulated work in the demo worker

use std::path::Path;

use architectural_enforcement::{report, scan, workspace_dir};

const ALLOWED_ASYNC_SLEEP: &[&str] = &["coordinator.rs", "host.rs", "worker.rs"];

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

#[test]
fn test_no_blocking_sleep() {
    for dir in ["stance/core/src", "stance/demo/src"] {
        let violations = scan(&workspace_dir(dir), |_, code| {
            code.contains("thread::sleep")
        });
        report("std::thread::sleep blocks the async runtime", &violations);
    }
}

#[test]
fn test_async_sleep_only_where_delay_is_intended() {
    for dir in ["stance/core/src", "stance/demo/src"] {
        let violations = scan(&workspace_dir(dir), |path, code| {
            code.contains("time::sleep") && !ALLOWED_ASYNC_SLEEP.contains(&file_name(path))
        });
        report(
            "sleeping to wait for events; wait on the channel or socket instead",
            &violations,
        );
    }
}
