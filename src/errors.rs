// src/errors.rs

//! Crate-wide error types.
//!
//! - [`BuildError`] covers everything that can go wrong for a single build
//!   attempt: workspace provisioning, spawning the runner, non-zero exits and
//!   deadline expiry.
//! - [`NgbuildError`] is the process-level error used by config loading and
//!   the high-level entry point.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::app::events::EventError;
use crate::types::BuildToken;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("workspace directory error at {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start build runner '{runner}': {source}")]
    ProcessSpawn {
        runner: String,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace provisioning did not complete")]
    ProvisionInterrupted,

    #[error("failed waiting for build runner: {0}")]
    ProcessWait(#[source] std::io::Error),

    #[error("build runner failed with {}", describe_exit(.code))]
    BuildFailure { code: Option<i32> },

    #[error("build exceeded its deadline of {deadline:?}")]
    DeadlineExceeded { deadline: Duration },

    #[error("build {0} has already been started")]
    AlreadyStarted(BuildToken),

    #[error("build {0} has not started yet")]
    NotStarted(BuildToken),

    #[error("output of build {0} has been released")]
    OutputReleased(BuildToken),
}

impl BuildError {
    pub(crate) fn directory(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Directory {
            path: path.into(),
            source,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum NgbuildError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, NgbuildError>;
