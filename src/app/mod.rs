// src/app/mod.rs

//! Apps: a named build recipe plus the builds started for it.
//!
//! An app turns change events into builds. Tracked changes each own one
//! reference to their current build, so its workspace and output survive
//! until the change is closed, replaced by a newer run, or the app shuts
//! down.

pub mod events;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::build::{Build, BuildConfig, BuildRef};
use crate::config::AppConfig;
use crate::integration::Integration;
use crate::shutdown::Shutdown;
use crate::types::{BuildToken, ChangeNumber};
use crate::workspace::Workspaces;

use self::events::{ChangeAction, ChangeEvent, EventError, parse_change_event};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct App {
    name: String,
    config: AppConfig,
    integrations: Vec<Arc<dyn Integration>>,
    workspaces: Arc<Workspaces>,
    builds: Mutex<Vec<Arc<Build>>>,
    tracked: Mutex<BTreeMap<ChangeNumber, BuildRef>>,
    tasks: Mutex<JoinSet<()>>,
    shutdown: Shutdown,
    closed: AtomicBool,
}

impl App {
    pub fn new(
        name: impl Into<String>,
        config: AppConfig,
        integrations: Vec<Arc<dyn Integration>>,
        workspaces: Arc<Workspaces>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            integrations,
            workspaces,
            builds: Mutex::new(Vec::new()),
            tracked: Mutex::new(BTreeMap::new()),
            tasks: Mutex::new(JoinSet::new()),
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn integrations(&self) -> &[Arc<dyn Integration>] {
        &self.integrations
    }

    /// Every build created by this app, oldest first.
    pub fn builds(&self) -> Vec<Arc<Build>> {
        lock(&self.builds).clone()
    }

    pub fn build(&self, token: &BuildToken) -> Option<Arc<Build>> {
        lock(&self.builds).iter().find(|b| b.token() == token).cloned()
    }

    /// Currently tracked changes and the token of their current build.
    pub fn tracked_changes(&self) -> Vec<(ChangeNumber, BuildToken)> {
        lock(&self.tracked)
            .iter()
            .map(|(number, build)| (*number, build.token().clone()))
            .collect()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.shutdown.is_triggered()
    }

    /// Create (but do not start) a build of this app.
    pub fn create_build(&self, base_repo: &str, merge_repo: Option<&str>) -> Arc<Build> {
        let mut config = BuildConfig::new(base_repo, &self.config.build_runner)
            .with_deadline(self.config.deadline)
            .with_integrations(self.integrations.iter().cloned());
        if let Some(merge) = merge_repo {
            config = config.with_merge_repo(merge);
        }
        for requirement in &self.config.requires {
            config = config.with_requirement(requirement.as_str());
        }

        let build = Arc::new(Build::new(config, Arc::clone(&self.workspaces)));
        lock(&self.builds).push(Arc::clone(&build));
        debug!(app = %self.name, token = %build.token(), "created build");
        build
    }

    /// Decode a raw event payload and dispatch it.
    ///
    /// A malformed payload is logged and dropped; the error is returned so
    /// the caller can answer the sender.
    pub fn handle_payload(&self, payload: &[u8]) -> Result<(), EventError> {
        match parse_change_event(payload) {
            Ok(event) => {
                self.handle_event(event);
                Ok(())
            }
            Err(err) => {
                warn!(app = %self.name, error = %err, "dropping malformed change event");
                Err(err)
            }
        }
    }

    pub fn handle_event(&self, event: ChangeEvent) {
        if self.is_closed() {
            warn!(app = %self.name, change = event.number, "app is shutting down; dropping event");
            return;
        }

        match event.action {
            ChangeAction::Opened | ChangeAction::Reopened => {
                info!(app = %self.name, change = event.number, "tracking change");
                self.start_tracked(&event);
            }
            ChangeAction::Synchronize => {
                info!(app = %self.name, change = event.number, "change updated; rebuilding");
                self.start_tracked(&event);
            }
            ChangeAction::Closed => {
                let removed = lock(&self.tracked).remove(&event.number);
                match removed {
                    Some(build) => {
                        info!(app = %self.name, change = event.number, token = %build.token(), "change closed");
                        drop(build);
                    }
                    None => debug!(app = %self.name, change = event.number, "closed change was not tracked"),
                }
            }
            ChangeAction::Other(action) => {
                warn!(app = %self.name, change = event.number, action = %action, "ignoring unsupported change action");
            }
        }
    }

    fn start_tracked(&self, event: &ChangeEvent) {
        let Ok(handle) = Handle::try_current() else {
            warn!(app = %self.name, change = event.number, "no async runtime; dropping event");
            return;
        };

        // `shutdown` closes the app under this lock, so a build is either
        // spawned into the set it cancels or never created.
        let mut tasks = lock(&self.tasks);
        if self.is_closed() {
            warn!(app = %self.name, change = event.number, "app is shutting down; dropping event");
            return;
        }

        let build = self.create_build(&event.base_repo, event.merge_repo.as_deref());
        let previous = lock(&self.tracked).insert(event.number, build.hold());
        if let Some(previous) = previous {
            debug!(app = %self.name, token = %previous.token(), "releasing superseded build");
        }

        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(
            async move {
                // Outcome is logged by the build itself.
                let _ = build.run().await;
            },
            &handle,
        );
    }

    /// Wait until every build started from an event has stopped.
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *lock(&self.tasks));
            if tasks.is_empty() {
                return;
            }
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    if e.is_panic() {
                        warn!(app = %self.name, error = %e, "build task panicked");
                    }
                }
            }
        }
    }

    /// Stop accepting events, cancel running builds and drop the tracker's
    /// references. Idempotent.
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut tasks = lock(&self.tasks);
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *tasks)
        };
        info!(app = %self.name, "shutting down app");

        let running = tasks.len();
        // An aborted run stops its build and kills the runner when dropped.
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}

        let tracked = std::mem::take(&mut *lock(&self.tracked));
        let released = tracked.len();
        drop(tracked);

        info!(app = %self.name, cancelled = running, released, "app shut down");
    }
}
