// src/build/runner.rs

//! Build-runner process execution.
//!
//! Spawns the configured runner inside the workspace, drains stdout/stderr
//! into [`OutputCapture`]s on their own Tokio tasks, and races process exit
//! against the build deadline.
//!
//! The runner is started as the leader of a fresh process group. When the
//! runner exits, hits its deadline or is cancelled, the whole group is
//! killed, so no descendant keeps working in a workspace about to be removed.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::build::output::OutputCapture;
use crate::errors::BuildError;

/// Size of each read from a child pipe.
const READ_CHUNK: usize = 8 * 1024;

/// How long to wait for the pipes to reach EOF once the runner's group is
/// gone. Only descendants that left the group can hold them longer.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Spawn attempts when the freshly written runner is still busy (ETXTBSY).
const SPAWN_RETRIES: u32 = 5;

/// Everything needed to start one runner process.
#[derive(Debug)]
pub(crate) struct RunnerInvocation<'a> {
    pub directory: &'a Path,
    pub runner: &'a str,
    pub deadline: Duration,
    pub env: Vec<(&'static str, String)>,
}

enum Exit {
    Status(io::Result<std::process::ExitStatus>),
    Deadline,
}

/// Run the build runner to completion or until the deadline expires.
///
/// Output captured before the process ends (for any reason) stays in the
/// captures. By the time this returns the runner has been reaped.
pub(crate) async fn run_process(
    invocation: RunnerInvocation<'_>,
    stdout: &OutputCapture,
    stderr: &OutputCapture,
) -> Result<(), BuildError> {
    let program = resolve_runner(invocation.directory, invocation.runner);

    let mut cmd = Command::new(&program);
    cmd.current_dir(invocation.directory)
        .envs(invocation.env.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = spawn_with_retry(&mut cmd)
        .await
        .map_err(|source| BuildError::ProcessSpawn {
            runner: invocation.runner.to_string(),
            source,
        })?;

    let mut group = ProcessGroup::new(child.id());
    info!(
        runner = %program.display(),
        pid = child.id(),
        deadline = ?invocation.deadline,
        "build runner started"
    );

    let drains: Vec<JoinHandle<()>> = [
        spawn_drain(child.stdout.take(), stdout.clone(), "stdout"),
        spawn_drain(child.stderr.take(), stderr.clone(), "stderr"),
    ]
    .into_iter()
    .flatten()
    .collect();

    // Exit wins a tie with the deadline.
    let exit = tokio::select! {
        biased;
        status = child.wait() => Exit::Status(status),
        _ = tokio::time::sleep(invocation.deadline) => Exit::Deadline,
    };

    let result = match exit {
        Exit::Status(Ok(status)) => {
            // Background children of the runner must not outlive the build.
            group.kill();
            let code = status.code();
            info!(exit_code = ?code, success = status.success(), "build runner exited");
            if status.success() {
                Ok(())
            } else {
                Err(BuildError::BuildFailure { code })
            }
        }
        Exit::Status(Err(e)) => Err(BuildError::ProcessWait(e)),
        Exit::Deadline => {
            warn!(deadline = ?invocation.deadline, "deadline exceeded; killing build runner");
            group.kill();
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill build runner");
            }
            Err(BuildError::DeadlineExceeded {
                deadline: invocation.deadline,
            })
        }
    };

    join_drains(drains).await;
    result
}

fn resolve_runner(directory: &Path, runner: &str) -> PathBuf {
    let path = Path::new(runner);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        directory.join(path)
    }
}

async fn spawn_with_retry(cmd: &mut Command) -> io::Result<Child> {
    let mut attempt = 0;
    loop {
        match cmd.spawn() {
            Err(e) if is_text_busy(&e) && attempt < SPAWN_RETRIES => {
                attempt += 1;
                debug!(attempt, "build runner busy; retrying spawn");
                tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
            }
            res => return res,
        }
    }
}

#[cfg(unix)]
fn is_text_busy(e: &io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32)
}

#[cfg(not(unix))]
fn is_text_busy(_e: &io::Error) -> bool {
    false
}

fn spawn_drain<R>(pipe: Option<R>, capture: OutputCapture, stream: &'static str) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut pipe = pipe?;
    Some(tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match pipe.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    capture.append(&buf[..n]);
                    trace!(stream, bytes = n, "captured output");
                }
                Err(e) => {
                    warn!(stream, error = %e, "error reading build output");
                    break;
                }
            }
        }
        debug!(stream, "output drain finished");
    }))
}

async fn join_drains(drains: Vec<JoinHandle<()>>) {
    for mut handle in drains {
        if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
            warn!("build output still open after runner exit; abandoning drain");
            handle.abort();
        }
    }
}

/// Kills the runner's process group once, either explicitly or on drop, so
/// neither a finished nor a cancelled run leaves the runner's children
/// behind. The pgid stays reserved while any member is alive; an empty group
/// yields `ESRCH`.
#[derive(Debug)]
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match signal::killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pgid, "killed build process group"),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "failed to kill build process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}
