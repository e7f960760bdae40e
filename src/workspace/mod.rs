// src/workspace/mod.rs

//! Workspace provisioning.
//!
//! Every build runs in its own directory under a shared root. Directory
//! names carry a random UUID and are created with `create_dir`, which fails
//! on an existing path, so two concurrent provisions can never hand out the
//! same directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::BuildError;

/// How many fresh names to try before giving up on `AlreadyExists`.
const MAX_NAME_ATTEMPTS: usize = 8;

/// Creates and removes per-build workspace directories under `root`.
#[derive(Debug, Clone)]
pub struct Workspaces {
    root: PathBuf,
}

impl Workspaces {
    /// Relative roots are made absolute against the current directory, so
    /// runner paths resolved inside a workspace stay valid.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    /// `$TMPDIR/ngbuild`.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join("ngbuild")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new, uniquely-named workspace directory and return its path.
    pub fn provision(&self) -> Result<PathBuf, BuildError> {
        fs::create_dir_all(&self.root).map_err(|e| BuildError::directory(&self.root, e))?;

        let mut last_err = None;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self
                .root
                .join(format!("build-{}", Uuid::new_v4().simple()));

            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!(dir = ?path, "provisioned workspace");
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    warn!(dir = ?path, "workspace name collision; retrying with a new name");
                    last_err = Some(BuildError::directory(path, e));
                }
                Err(e) => return Err(BuildError::directory(path, e)),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            BuildError::directory(
                &self.root,
                std::io::Error::other("could not find a free workspace name"),
            )
        }))
    }

    /// Recursively remove a workspace directory.
    ///
    /// A path that no longer exists counts as cleaned up, so calling this
    /// twice is harmless.
    pub fn cleanup(&self, path: &Path) -> Result<(), BuildError> {
        match fs::remove_dir_all(path) {
            Ok(()) => {
                debug!(dir = ?path, "removed workspace");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(dir = ?path, "workspace already removed");
                Ok(())
            }
            Err(e) => Err(BuildError::directory(path, e)),
        }
    }
}

impl Default for Workspaces {
    fn default() -> Self {
        Self::new(Self::default_root())
    }
}

/// Provision a workspace under the default root.
pub fn provision_directory() -> Result<PathBuf, BuildError> {
    Workspaces::default().provision()
}

/// Remove a workspace previously returned by [`provision_directory`].
pub fn cleanup_directory(path: &Path) -> Result<(), BuildError> {
    Workspaces::default().cleanup(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn provision_then_cleanup_twice() {
        let dir = provision_directory().unwrap();
        assert!(dir.is_dir());

        fs::write(dir.join("nested.txt"), b"x").unwrap();
        cleanup_directory(&dir).unwrap();
        assert!(!dir.exists());

        // Second cleanup on the same path is a no-op.
        cleanup_directory(&dir).unwrap();
    }

    #[test]
    fn creates_missing_root() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspaces::new(tmp.path().join("a/b/c"));

        let dir = ws.provision().unwrap();
        assert!(dir.starts_with(ws.root()));
        assert!(dir.is_dir());
    }

    #[test]
    fn concurrent_provisions_are_unique() {
        let tmp = TempDir::new().unwrap();
        let ws = Arc::new(Workspaces::new(tmp.path()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ws = Arc::clone(&ws);
                std::thread::spawn(move || ws.provision().unwrap())
            })
            .collect();

        let dirs: HashSet<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(dirs.len(), 16);
    }

    #[cfg(unix)]
    #[test]
    fn unusable_root_is_a_directory_error() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("not-a-dir");
        fs::write(&file, b"").unwrap();

        let ws = Workspaces::new(&file);
        assert!(matches!(ws.provision(), Err(BuildError::Directory { .. })));
    }
}
