//! Polling for device nodes that are created asynchronously during boot.

use std::time::{Duration, Instant};

use camino::Utf8Path;
use rustix::fs::Access;

/// Interval between existence checks.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn exists(path: &Utf8Path) -> bool {
    rustix::fs::access(path.as_std_path(), Access::EXISTS).is_ok()
}

/// Wait until `path` exists, checking every few milliseconds.
///
/// Returns `true` if the path appeared within `timeout`.
pub fn wait_for_path(path: &Utf8Path, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if exists(path) {
            return true;
        }
        if start.elapsed() >= timeout {
            tracing::warn!("Timed out after {timeout:?} waiting for {path}");
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
