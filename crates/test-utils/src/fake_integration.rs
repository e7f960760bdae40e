use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use ngbuild::app::App;
use ngbuild::build::BuildConfig;
use ngbuild::integration::Integration;

use crate::scripts;

/// What `provide_for` does when called.
#[derive(Debug, Clone)]
pub enum Provide {
    /// Do nothing and succeed.
    Nothing,
    /// Write the standard runner scripts (see [`crate::scripts`]).
    Scripts,
    /// Fail with the given message.
    Fail(String),
    /// Block the calling thread, then write the runner scripts.
    Slow(Duration),
}

/// An integration for tests that:
/// - answers `is_provider` with a fixed value (or for one requirement only)
/// - performs a configurable `provide_for`
/// - records every call
#[derive(Debug)]
pub struct FakeIntegration {
    identifier: String,
    provides_for: Option<String>,
    answer: bool,
    provide: Provide,
    provided: Mutex<Vec<PathBuf>>,
    attached: Mutex<Vec<String>>,
    shutdowns: Mutex<usize>,
    fail_attach: bool,
}

impl FakeIntegration {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            provides_for: None,
            answer: true,
            provide: Provide::Nothing,
            provided: Mutex::new(Vec::new()),
            attached: Mutex::new(Vec::new()),
            shutdowns: Mutex::new(0),
            fail_attach: false,
        }
    }

    /// Provider for every requirement; writes the runner scripts.
    pub fn scripts(identifier: &str) -> Self {
        Self::new(identifier).provide(Provide::Scripts)
    }

    pub fn answer(mut self, answer: bool) -> Self {
        self.answer = answer;
        self
    }

    /// Only answer `true` for this exact requirement.
    pub fn only_for(mut self, requirement: &str) -> Self {
        self.provides_for = Some(requirement.to_string());
        self
    }

    pub fn provide(mut self, provide: Provide) -> Self {
        self.provide = provide;
        self
    }

    pub fn failing_attach(mut self) -> Self {
        self.fail_attach = true;
        self
    }

    pub fn into_arc(self) -> Arc<dyn Integration> {
        Arc::new(self)
    }

    /// Directories `provide_for` was called with, in order.
    pub fn provided(&self) -> Vec<PathBuf> {
        self.provided.lock().unwrap().clone()
    }

    pub fn attached(&self) -> Vec<String> {
        self.attached.lock().unwrap().clone()
    }

    pub fn shutdowns(&self) -> usize {
        *self.shutdowns.lock().unwrap()
    }
}

impl Integration for FakeIntegration {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn is_provider(&self, requirement: &str) -> bool {
        match self.provides_for {
            Some(ref only) => only == requirement,
            None => self.answer,
        }
    }

    fn provide_for(&self, _config: &BuildConfig, directory: &Path) -> Result<()> {
        self.provided.lock().unwrap().push(directory.to_path_buf());
        match self.provide {
            Provide::Nothing => Ok(()),
            Provide::Scripts => {
                scripts::write_all(directory)?;
                Ok(())
            }
            Provide::Fail(ref msg) => Err(anyhow!("{msg}")),
            Provide::Slow(delay) => {
                std::thread::sleep(delay);
                scripts::write_all(directory)?;
                Ok(())
            }
        }
    }

    fn attach_to_app(&self, app: &Arc<App>) -> Result<()> {
        if self.fail_attach {
            return Err(anyhow!("refusing to attach to {}", app.name()));
        }
        self.attached.lock().unwrap().push(app.name().to_string());
        Ok(())
    }

    fn shutdown(&self) {
        *self.shutdowns.lock().unwrap() += 1;
    }
}
