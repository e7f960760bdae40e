// src/build/lifecycle.rs

//! Pure build lifecycle state machine.
//!
//! Tracks state, reference count and the workspace directory of one build,
//! and decides when the build's resources must be released. It performs no
//! IO: callers hold it behind a mutex, act on the returned [`Release`]
//! outside the lock, and get the exactly-once guarantee from here.

use std::path::{Path, PathBuf};

/// Externally visible build state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// Constructed, no process started.
    Created,
    /// Workspace provisioned (or being provisioned), runner executing.
    Running,
    /// Terminal: exited, killed, or failed before the runner could start.
    Stopped,
}

impl BuildState {
    pub fn has_stopped(&self) -> bool {
        matches!(self, BuildState::Stopped)
    }
}

/// How a finished build ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded,
    Failed { code: Option<i32> },
    DeadlineExceeded,
    /// Could not run at all (workspace, spawn or wait failure).
    Errored(String),
    /// The run future was dropped before it finished.
    Cancelled,
}

/// Resources to release, handed out exactly once per build.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Release {
    pub directory: Option<PathBuf>,
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: BuildState,
    refs: usize,
    directory: Option<PathBuf>,
    outcome: Option<BuildOutcome>,
    released: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: BuildState::Created,
            refs: 0,
            directory: None,
            outcome: None,
            released: false,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn outcome(&self) -> Option<&BuildOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// `Created -> Running`. Returns false if the build was already started.
    pub fn start(&mut self) -> bool {
        if self.state != BuildState::Created {
            return false;
        }
        self.state = BuildState::Running;
        true
    }

    pub fn set_directory(&mut self, directory: PathBuf) {
        debug_assert_eq!(self.state, BuildState::Running);
        self.directory = Some(directory);
    }

    pub fn retain(&mut self) {
        self.refs += 1;
    }

    /// Drop one reference. Returns the release if this was the last
    /// reference of a stopped build. Unref at zero is ignored.
    pub fn unref(&mut self) -> Option<Release> {
        if self.refs == 0 {
            return None;
        }
        self.refs -= 1;
        self.try_release()
    }

    /// Move to `Stopped` (idempotent) and release right away if nobody
    /// holds a reference.
    pub fn stop(&mut self, outcome: BuildOutcome) -> Option<Release> {
        if self.state != BuildState::Stopped {
            self.state = BuildState::Stopped;
            self.outcome = Some(outcome);
        }
        self.try_release()
    }

    fn try_release(&mut self) -> Option<Release> {
        if self.released || self.refs > 0 || self.state != BuildState::Stopped {
            return None;
        }
        self.released = true;
        Some(Release {
            directory: self.directory.take(),
        })
    }
}
