#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ngbuild::build::{Build, BuildConfig};
use ngbuild::config::{AppSection, ConfigFile, ConfigSection, IntegrationConfig, RawConfigFile};
use ngbuild::integration::Integration;
use ngbuild::types::BuildToken;
use ngbuild::workspace::Workspaces;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                integration: BTreeMap::new(),
                app: BTreeMap::new(),
            },
        }
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.config.workspace_root = Some(root.into());
        self
    }

    pub fn default_deadline(mut self, deadline: &str) -> Self {
        self.config.config.default_deadline = deadline.to_string();
        self
    }

    pub fn with_source(mut self, id: &str, hosts: &[&str]) -> Self {
        self.config.integration.insert(
            id.to_string(),
            IntegrationConfig::Source {
                hosts: hosts.iter().map(|h| h.to_string()).collect(),
            },
        );
        self
    }

    pub fn with_files(mut self, id: &str, from: impl Into<PathBuf>) -> Self {
        self.config.integration.insert(
            id.to_string(),
            IntegrationConfig::Files {
                from: from.into(),
                providers: vec!["*".to_string()],
            },
        );
        self
    }

    pub fn with_app(mut self, name: &str, app: AppSection) -> Self {
        self.config.app.insert(name.to_string(), app);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `AppSection`.
pub struct AppSectionBuilder {
    app: AppSection,
}

impl AppSectionBuilder {
    pub fn new(build_runner: &str) -> Self {
        Self {
            app: AppSection {
                build_runner: build_runner.to_string(),
                deadline: None,
                requires: vec![],
                integrations: None,
                base_repo: None,
            },
        }
    }

    pub fn deadline(mut self, deadline: &str) -> Self {
        self.app.deadline = Some(deadline.to_string());
        self
    }

    pub fn requires(mut self, requirement: &str) -> Self {
        self.app.requires.push(requirement.to_string());
        self
    }

    pub fn integration(mut self, id: &str) -> Self {
        self.app.integrations.get_or_insert(vec![]).push(id.to_string());
        self
    }

    pub fn base_repo(mut self, base: &str) -> Self {
        self.app.base_repo = Some(base.to_string());
        self
    }

    pub fn build(self) -> AppSection {
        self.app
    }
}

/// Builder for `BuildConfig` plus the `Build` that runs it.
pub struct BuildConfigBuilder {
    config: BuildConfig,
    token: Option<BuildToken>,
}

impl BuildConfigBuilder {
    pub fn new(build_runner: &str) -> Self {
        Self {
            config: BuildConfig::new("https://example.com/acme/web.git", build_runner),
            token: None,
        }
    }

    pub fn base_repo(mut self, base: &str) -> Self {
        self.config.base_repo = base.to_string();
        self
    }

    pub fn merge_repo(mut self, merge: &str) -> Self {
        self.config = self.config.with_merge_repo(merge);
        self
    }

    pub fn integration(mut self, integration: Arc<dyn Integration>) -> Self {
        self.config = self.config.with_integration(integration);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config = self.config.with_deadline(deadline);
        self
    }

    pub fn requirement(mut self, requirement: &str) -> Self {
        self.config = self.config.with_requirement(requirement);
        self
    }

    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(BuildToken::from(token));
        self
    }

    pub fn config(self) -> BuildConfig {
        self.config
    }

    /// A build whose workspaces live under `root`.
    pub fn build_in(self, root: impl Into<PathBuf>) -> Arc<Build> {
        let workspaces = Arc::new(Workspaces::new(root));
        let build = match self.token {
            Some(token) => Build::with_token(token, self.config, workspaces),
            None => Build::new(self.config, workspaces),
        };
        Arc::new(build)
    }
}
