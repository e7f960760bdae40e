// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// workspace_root = "/var/tmp/ngbuild"
/// default_deadline = "30m"
///
/// [integration.source]
/// kind = "source"
/// hosts = ["github.com"]
///
/// [app.web]
/// build_runner = "build.sh"
/// deadline = "10m"
/// ```
///
/// This is the unvalidated shape; use `ConfigFile::try_from` (or
/// [`crate::config::load_and_validate`]) to get a [`ConfigFile`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global settings from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Integrations from `[integration.<name>]`, keyed by identifier.
    #[serde(default)]
    pub integration: BTreeMap<String, IntegrationConfig>,

    /// Apps from `[app.<name>]`, keyed by app name.
    #[serde(default)]
    pub app: BTreeMap<String, AppSection>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Directory under which per-build workspaces are created.
    ///
    /// Defaults to `$TMPDIR/ngbuild`.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,

    /// Deadline applied to apps that do not set their own, e.g. `"30m"`.
    #[serde(default = "default_deadline")]
    pub default_deadline: String,
}

fn default_deadline() -> String {
    "30m".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            default_deadline: default_deadline(),
        }
    }
}

/// `[integration.<name>]` section, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IntegrationConfig {
    /// Source-control provider: writes checkout tooling for repository
    /// references and routes change events to apps.
    Source {
        /// Restrict to references on these hosts; empty means any host.
        #[serde(default)]
        hosts: Vec<String>,
    },
    /// Copies the files of a local directory into every workspace it
    /// provides for.
    Files {
        /// Directory to copy from; relative paths are resolved against the
        /// config file's directory.
        from: PathBuf,
        /// Requirements this integration answers to; `"*"` matches all.
        #[serde(default = "default_providers")]
        providers: Vec<String>,
    },
}

fn default_providers() -> Vec<String> {
    vec!["*".to_string()]
}

/// `[app.<name>]` section as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// Executable to run inside the workspace.
    pub build_runner: String,

    /// Per-app deadline; falls back to `[config].default_deadline`.
    #[serde(default)]
    pub deadline: Option<String>,

    /// Extra requirements every build of this app carries.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Integration identifiers used by this app; `None` means all of them.
    #[serde(default)]
    pub integrations: Option<Vec<String>>,

    /// Default source reference for manually triggered builds.
    #[serde(default)]
    pub base_repo: Option<String>,
}

/// Validated per-app configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub build_runner: String,
    pub deadline: Duration,
    pub requires: Vec<String>,
    /// Resolved integration identifiers, in config order.
    pub integrations: Vec<String>,
    pub base_repo: Option<String>,
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>`, so holders can rely on
/// every app having a runner, a parsed deadline, and known integrations.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub workspace_root: Option<PathBuf>,
    pub integrations: BTreeMap<String, IntegrationConfig>,
    pub apps: BTreeMap<String, AppConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        workspace_root: Option<PathBuf>,
        integrations: BTreeMap<String, IntegrationConfig>,
        apps: BTreeMap<String, AppConfig>,
    ) -> Self {
        Self {
            workspace_root,
            integrations,
            apps,
        }
    }

    /// Resolve relative paths (workspace root, `files` sources) against
    /// `base`, typically the directory holding the config file.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        if let Some(root) = self.workspace_root.as_mut() {
            if root.is_relative() {
                *root = base.join(&*root);
            }
        }
        for integration in self.integrations.values_mut() {
            if let IntegrationConfig::Files { from, .. } = integration {
                if from.is_relative() {
                    *from = base.join(&*from);
                }
            }
        }
        self
    }
}
