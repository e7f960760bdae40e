// src/context.rs

//! Explicit registries of integrations and apps.
//!
//! Built once from configuration at startup and passed by reference to
//! whatever needs them; nothing here is global.

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::App;
use crate::config::{ConfigFile, IntegrationConfig};
use crate::errors::{NgbuildError, Result};
use crate::integration::{FilesIntegration, Integration, SourceIntegration};
use crate::shutdown::Shutdown;
use crate::workspace::Workspaces;

#[derive(Debug)]
pub struct Context {
    integrations: Vec<Arc<dyn Integration>>,
    apps: Vec<Arc<App>>,
    shutdown: Shutdown,
}

impl Context {
    pub fn new(integrations: Vec<Arc<dyn Integration>>, apps: Vec<Arc<App>>, shutdown: Shutdown) -> Self {
        Self {
            integrations,
            apps,
            shutdown,
        }
    }

    /// Instantiate every configured integration and app.
    pub fn from_config(config: &ConfigFile, shutdown: Shutdown) -> Result<Self> {
        let workspaces = Arc::new(match config.workspace_root {
            Some(ref root) => Workspaces::new(root),
            None => Workspaces::default(),
        });

        let integrations: Vec<Arc<dyn Integration>> = config
            .integrations
            .iter()
            .map(|(id, kind)| -> Arc<dyn Integration> {
                match kind {
                    IntegrationConfig::Source { hosts } => Arc::new(SourceIntegration::new(id, hosts.clone())),
                    IntegrationConfig::Files { from, providers } => {
                        Arc::new(FilesIntegration::new(id, from, providers.clone()))
                    }
                }
            })
            .collect();

        let mut apps = Vec::with_capacity(config.apps.len());
        for (name, app_config) in config.apps.iter() {
            let selected = app_config
                .integrations
                .iter()
                .map(|id| {
                    integrations
                        .iter()
                        .find(|i| i.identifier() == id)
                        .cloned()
                        .ok_or_else(|| {
                            NgbuildError::ConfigError(format!("app '{name}' references unknown integration '{id}'"))
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            apps.push(Arc::new(App::new(
                name,
                app_config.clone(),
                selected,
                Arc::clone(&workspaces),
                shutdown.clone(),
            )));
        }

        info!(
            integrations = integrations.len(),
            apps = apps.len(),
            workspace_root = ?workspaces.root(),
            "context ready"
        );
        Ok(Self::new(integrations, apps, shutdown))
    }

    pub fn integrations(&self) -> &[Arc<dyn Integration>] {
        &self.integrations
    }

    pub fn apps(&self) -> &[Arc<App>] {
        &self.apps
    }

    pub fn app(&self, name: &str) -> Option<&Arc<App>> {
        self.apps.iter().find(|a| a.name() == name)
    }

    pub fn shutdown_token(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Attach each app's integrations to it. A failing attach is logged and
    /// the rest continue.
    pub fn attach_all(&self) {
        for app in self.apps.iter() {
            for integration in app.integrations() {
                match integration.attach_to_app(app) {
                    Ok(()) => info!(app = %app.name(), integration = %integration.identifier(), "integration attached"),
                    Err(err) => warn!(
                        app = %app.name(),
                        integration = %integration.identifier(),
                        error = %err,
                        "failed to attach integration"
                    ),
                }
            }
        }
    }

    /// Shut down all apps, then all integrations.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        for app in self.apps.iter() {
            app.shutdown().await;
        }
        for integration in self.integrations.iter() {
            integration.shutdown();
        }
        info!("shutdown complete");
    }
}
