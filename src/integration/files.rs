// src/integration/files.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::app::App;
use crate::build::BuildConfig;
use crate::integration::Integration;

/// Copies the regular files of a local directory (build scripts, shared CI
/// config) into each workspace it provides for. File permissions are kept,
/// so executable scripts stay executable.
#[derive(Debug, Clone)]
pub struct FilesIntegration {
    identifier: String,
    from: PathBuf,
    providers: Vec<String>,
}

impl FilesIntegration {
    /// `providers` lists the requirements answered; `"*"` answers all.
    pub fn new(identifier: impl Into<String>, from: impl Into<PathBuf>, providers: Vec<String>) -> Self {
        Self {
            identifier: identifier.into(),
            from: from.into(),
            providers,
        }
    }
}

impl Integration for FilesIntegration {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn is_provider(&self, requirement: &str) -> bool {
        self.providers.iter().any(|p| p == "*" || p == requirement)
    }

    fn provide_for(&self, _config: &BuildConfig, directory: &Path) -> Result<()> {
        let entries = fs::read_dir(&self.from).with_context(|| format!("reading dir {:?}", self.from))?;

        let mut copied = 0usize;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let target = directory.join(entry.file_name());
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copying {:?} to {:?}", entry.path(), target))?;
            copied += 1;
        }

        debug!(integration = %self.identifier, copied, dir = ?directory, "copied files into workspace");
        Ok(())
    }

    fn attach_to_app(&self, app: &Arc<App>) -> Result<()> {
        debug!(integration = %self.identifier, app = %app.name(), "files integration needs no app registration");
        Ok(())
    }

    fn shutdown(&self) {}
}
