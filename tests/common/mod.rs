#![allow(dead_code, unused_imports)]

pub use ngbuild_test_utils::builders;
pub use ngbuild_test_utils::fake_integration::{FakeIntegration, Provide};
pub use ngbuild_test_utils::scripts;
pub use ngbuild_test_utils::{init_tracing, with_timeout};

use std::path::Path;

/// Whether a process with `pid` still exists (and is not a zombie).
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // Field 3 is the state; `Z` means exited but not yet reaped.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z"),
        Err(_) => false,
    }
}

/// Read the pid written by the `fiveminutes.sh` fixture, waiting for it to
/// appear.
pub async fn read_runner_pid(workspace: &Path) -> u32 {
    let path = workspace.join(scripts::PID_FILE);
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(&path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("runner never wrote {path:?}");
}
