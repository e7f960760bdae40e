// src/build/mod.rs

//! Builds: one deadline-bounded run of an app's build runner in an isolated
//! workspace.
//!
//! - `lifecycle.rs`: pure state machine (state, refcount, exactly-once release).
//! - `runner.rs`: spawns the runner and races it against the deadline.
//! - `output.rs`: byte-exact stdout/stderr captures and readers.
//!
//! A [`Build`] is shared through `Arc`. Consumers that want to read its
//! output after it stops must hold a reference ([`Build::add_ref`] or
//! [`Build::hold`]); once the build has stopped and the last reference is
//! dropped, the workspace is removed and the output discarded.

pub mod lifecycle;
pub mod output;
pub(crate) mod runner;

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::BuildError;
use crate::integration::{
    Integration, ProvisionFailure, ProvisionReport, provision_build_into_directory,
};
use crate::types::BuildToken;
use crate::workspace::Workspaces;

use self::lifecycle::{Lifecycle, Release};
use self::runner::{RunnerInvocation, run_process};

pub use lifecycle::{BuildOutcome, BuildState};
pub use output::{OutputCapture, OutputReader};

/// Deadline used when none is configured.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Immutable description of what a build runs.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    pub base_repo: String,
    pub merge_repo: Option<String>,
    pub integrations: Vec<Arc<dyn Integration>>,
    pub build_runner: String,
    pub deadline: Duration,
    /// Extra named requirements beyond the source references.
    pub requirements: Vec<String>,
}

impl BuildConfig {
    pub fn new(base_repo: impl Into<String>, build_runner: impl Into<String>) -> Self {
        Self {
            base_repo: base_repo.into(),
            merge_repo: None,
            integrations: Vec::new(),
            build_runner: build_runner.into(),
            deadline: DEFAULT_DEADLINE,
            requirements: Vec::new(),
        }
    }

    pub fn with_merge_repo(mut self, merge_repo: impl Into<String>) -> Self {
        self.merge_repo = Some(merge_repo.into());
        self
    }

    pub fn with_integration(mut self, integration: Arc<dyn Integration>) -> Self {
        self.integrations.push(integration);
        self
    }

    pub fn with_integrations(mut self, integrations: impl IntoIterator<Item = Arc<dyn Integration>>) -> Self {
        self.integrations.extend(integrations);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.push(requirement.into());
        self
    }

    /// Everything integrations are asked to provide for: the base reference
    /// (always first, even if empty), the merge reference, then the extra
    /// requirements. Duplicates are dropped.
    pub fn requirements(&self) -> Vec<&str> {
        let mut out: Vec<&str> = vec![self.base_repo.as_str()];
        let rest = self
            .merge_repo
            .as_deref()
            .into_iter()
            .chain(self.requirements.iter().map(String::as_str));
        for requirement in rest {
            if !out.contains(&requirement) {
                out.push(requirement);
            }
        }
        out
    }
}

/// One build attempt. See the module docs for the reference discipline.
#[derive(Debug)]
pub struct Build {
    token: BuildToken,
    config: BuildConfig,
    workspaces: Arc<Workspaces>,
    lifecycle: Mutex<Lifecycle>,
    provision: Mutex<ProvisionReport>,
    stdout: OutputCapture,
    stderr: OutputCapture,
}

impl Build {
    pub fn new(config: BuildConfig, workspaces: Arc<Workspaces>) -> Self {
        Self::with_token(BuildToken::generate(), config, workspaces)
    }

    pub fn with_token(token: BuildToken, config: BuildConfig, workspaces: Arc<Workspaces>) -> Self {
        Self {
            token,
            config,
            workspaces,
            lifecycle: Mutex::new(Lifecycle::new()),
            provision: Mutex::new(ProvisionReport::default()),
            stdout: OutputCapture::new(),
            stderr: OutputCapture::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn token(&self) -> &BuildToken {
        &self.token
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn state(&self) -> BuildState {
        self.lock().state()
    }

    pub fn outcome(&self) -> Option<BuildOutcome> {
        self.lock().outcome().cloned()
    }

    /// Workspace directory, present from provisioning until release.
    pub fn directory(&self) -> Option<PathBuf> {
        self.lock().directory().map(Path::to_path_buf)
    }

    pub fn ref_count(&self) -> usize {
        self.lock().refs()
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_released()
    }

    /// Integrations that populated this build's workspace, in call order.
    pub fn provisioned_integrations(&self) -> Vec<String> {
        self.provision_report().provided
    }

    /// Integrations that failed to provision this build's workspace.
    pub fn provision_failures(&self) -> Vec<ProvisionFailure> {
        self.provision_report().failed
    }

    fn provision_report(&self) -> ProvisionReport {
        self.provision
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_ref(&self) {
        let refs = {
            let mut lc = self.lock();
            lc.retain();
            lc.refs()
        };
        debug!(token = %self.token, refs, "build ref added");
    }

    /// Drop a reference. The last one on a stopped build removes the
    /// workspace synchronously on the calling thread; a large tree can take
    /// a while, so async callers holding many builds may want to drop them
    /// from `spawn_blocking`.
    pub fn unref(&self) {
        let (release, refs) = {
            let mut lc = self.lock();
            if lc.refs() == 0 {
                drop(lc);
                warn!(token = %self.token, "unref on build with no references; ignoring");
                return;
            }
            let release = lc.unref();
            if release.is_some() {
                self.close_output();
            }
            (release, lc.refs())
        };
        debug!(token = %self.token, refs, "build ref dropped");

        if let Some(release) = release {
            self.release(release);
        }
    }

    /// Take a reference that is dropped together with the returned guard.
    pub fn hold(self: &Arc<Self>) -> BuildRef {
        self.add_ref();
        BuildRef {
            build: Arc::clone(self),
        }
    }

    pub fn stdout(&self) -> Result<OutputReader, BuildError> {
        self.read_output(&self.stdout)
    }

    pub fn stderr(&self) -> Result<OutputReader, BuildError> {
        self.read_output(&self.stderr)
    }

    fn read_output(&self, capture: &OutputCapture) -> Result<OutputReader, BuildError> {
        let lc = self.lock();
        if lc.is_released() {
            return Err(BuildError::OutputReleased(self.token.clone()));
        }
        if lc.state() == BuildState::Created {
            return Err(BuildError::NotStarted(self.token.clone()));
        }
        Ok(capture.reader())
    }

    /// Provision the workspace, run the build runner and wait for it.
    ///
    /// The build is `Stopped` by the time this returns, and also if the
    /// returned future is dropped early (the runner is then killed and the
    /// outcome is [`BuildOutcome::Cancelled`]).
    pub async fn run(&self) -> Result<(), BuildError> {
        if !self.lock().start() {
            return Err(BuildError::AlreadyStarted(self.token.clone()));
        }
        info!(
            token = %self.token,
            base_repo = %self.config.base_repo,
            merge_repo = ?self.config.merge_repo,
            runner = %self.config.build_runner,
            "build started"
        );

        let guard = StopOnDrop { build: Some(self) };
        let result = self.execute().await;
        guard.disarm();

        let outcome = outcome_of(&result);
        match &result {
            Ok(()) => info!(token = %self.token, "build succeeded"),
            Err(err) => warn!(token = %self.token, error = %err, "build did not succeed"),
        }
        self.stop(outcome);
        result
    }

    async fn execute(&self) -> Result<(), BuildError> {
        let (directory, report) = self.provision_workspace().await?;
        self.lock().set_directory(directory.clone());
        *self.provision.lock().unwrap_or_else(PoisonError::into_inner) = report;

        let invocation = RunnerInvocation {
            directory: &directory,
            runner: &self.config.build_runner,
            deadline: self.config.deadline,
            env: self.runner_env(&directory),
        };
        run_process(invocation, &self.stdout, &self.stderr).await
    }

    /// Create and populate the workspace on the blocking pool.
    ///
    /// Integrations do plain filesystem (and possibly network) work, so they
    /// must not hold an async worker. The directory is owned by the pending
    /// task until it is returned here.
    async fn provision_workspace(&self) -> Result<(PathBuf, ProvisionReport), BuildError> {
        let workspaces = Arc::clone(&self.workspaces);
        let config = self.config.clone();
        let task = tokio::task::spawn_blocking(move || -> Result<_, BuildError> {
            let directory = workspaces.provision()?;
            match provision_build_into_directory(&config, &directory) {
                Ok(report) => Ok((directory, report)),
                Err(err) => {
                    if let Err(e) = workspaces.cleanup(&directory) {
                        warn!(error = %e, "failed to remove unusable workspace");
                    }
                    Err(err)
                }
            }
        });

        let mut pending = PendingProvision {
            task: Some(task),
            workspaces: Arc::clone(&self.workspaces),
        };
        pending.finish().await
    }

    fn runner_env(&self, directory: &Path) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("NGBUILD_TOKEN", self.token.to_string()),
            ("NGBUILD_BASE_REPO", self.config.base_repo.clone()),
            ("NGBUILD_WORKSPACE", directory.display().to_string()),
        ];
        if let Some(ref merge) = self.config.merge_repo {
            env.push(("NGBUILD_MERGE_REPO", merge.clone()));
        }
        env
    }

    fn stop(&self, outcome: BuildOutcome) {
        let release = {
            let mut lc = self.lock();
            let release = lc.stop(outcome);
            if release.is_some() {
                self.close_output();
            }
            release
        };
        debug!(token = %self.token, "build stopped");

        if let Some(release) = release {
            self.release(release);
        }
    }

    /// Must be called with the lifecycle lock held, so readers never see a
    /// released build with live output.
    fn close_output(&self) {
        self.stdout.close();
        self.stderr.close();
    }

    fn release(&self, release: Release) {
        if let Some(directory) = release.directory {
            if let Err(err) = self.workspaces.cleanup(&directory) {
                warn!(token = %self.token, error = %err, "failed to remove build workspace");
            }
        }
        info!(token = %self.token, "build released");
    }
}

type ProvisionTask = JoinHandle<Result<(PathBuf, ProvisionReport), BuildError>>;

/// A provisioning pass running on the blocking pool. If the run is cancelled
/// before the pass returns, the workspace it creates is removed once the
/// pass completes.
struct PendingProvision {
    task: Option<ProvisionTask>,
    workspaces: Arc<Workspaces>,
}

impl PendingProvision {
    async fn finish(&mut self) -> Result<(PathBuf, ProvisionReport), BuildError> {
        let Some(task) = self.task.as_mut() else {
            return Err(BuildError::ProvisionInterrupted);
        };
        let joined = task.await;
        self.task = None;
        match joined {
            Ok(res) => res,
            Err(e) => {
                warn!(error = %e, "provisioning task failed");
                Err(BuildError::ProvisionInterrupted)
            }
        }
    }
}

impl Drop for PendingProvision {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let Ok(handle) = Handle::try_current() else {
            warn!("no async runtime; abandoning cancelled provisioning pass");
            return;
        };
        let workspaces = Arc::clone(&self.workspaces);
        handle.spawn(async move {
            if let Ok(Ok((directory, _))) = task.await {
                debug!(dir = ?directory, "removing workspace of cancelled build");
                if let Err(e) = workspaces.cleanup(&directory) {
                    warn!(error = %e, "failed to remove workspace of cancelled build");
                }
            }
        });
    }
}

fn outcome_of(result: &Result<(), BuildError>) -> BuildOutcome {
    match result {
        Ok(()) => BuildOutcome::Succeeded,
        Err(BuildError::BuildFailure { code }) => BuildOutcome::Failed { code: *code },
        Err(BuildError::DeadlineExceeded { .. }) => BuildOutcome::DeadlineExceeded,
        Err(err) => BuildOutcome::Errored(err.to_string()),
    }
}

/// Moves a build to `Stopped` if its `run()` future is dropped mid-flight.
struct StopOnDrop<'a> {
    build: Option<&'a Build>,
}

impl StopOnDrop<'_> {
    fn disarm(mut self) {
        self.build = None;
    }
}

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(build) = self.build.take() {
            warn!(token = %build.token, "build run cancelled");
            build.stop(BuildOutcome::Cancelled);
        }
    }
}

/// A counted reference to a [`Build`], released on drop.
#[derive(Debug)]
pub struct BuildRef {
    build: Arc<Build>,
}

impl BuildRef {
    pub fn build(&self) -> &Arc<Build> {
        &self.build
    }
}

impl Deref for BuildRef {
    type Target = Build;

    fn deref(&self) -> &Build {
        &self.build
    }
}

impl Clone for BuildRef {
    fn clone(&self) -> Self {
        self.build.hold()
    }
}

impl Drop for BuildRef {
    fn drop(&mut self) {
        self.build.unref();
    }
}
