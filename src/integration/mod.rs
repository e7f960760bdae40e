// src/integration/mod.rs

//! Pluggable provider integrations.
//!
//! An [`Integration`] can populate a build workspace with provider-specific
//! tooling, config or credentials. The core never inspects concrete types:
//! it asks each integration at runtime whether it is a provider for one of
//! the build's requirements and, if so, lets it write into the workspace.
//!
//! - [`source`] is the source-control provider (checkout tooling, change
//!   event routes).
//! - [`files`] copies a local directory of scripts/config into workspaces.
//! - [`provision_build_into_directory`] is the best-effort provisioning pass
//!   run by every build.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::app::App;
use crate::build::BuildConfig;
use crate::errors::BuildError;

pub mod files;
pub mod source;

pub use files::FilesIntegration;
pub use source::SourceIntegration;

/// Capability interface implemented by every provider.
pub trait Integration: Send + Sync + Debug {
    /// Stable display name, also used to reference the integration from
    /// app config.
    fn identifier(&self) -> &str;

    /// Whether this integration can satisfy `requirement`. Must be free of
    /// side effects.
    fn is_provider(&self, requirement: &str) -> bool;

    /// Write provider-specific files into `directory` for this build.
    fn provide_for(&self, config: &BuildConfig, directory: &Path) -> Result<()>;

    /// One-time registration against an app (e.g. event routes).
    fn attach_to_app(&self, app: &Arc<App>) -> Result<()>;

    /// Release provider-held resources. Must not block indefinitely.
    fn shutdown(&self);
}

/// An integration whose `provide_for` failed during provisioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionFailure {
    pub integration: String,
    pub message: String,
}

/// What happened during one provisioning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Integrations whose `provide_for` succeeded, in call order.
    pub provided: Vec<String>,
    /// Integrations whose `provide_for` failed, in call order.
    pub failed: Vec<ProvisionFailure>,
}

/// Let every integration in `config` that provides for one of the build's
/// requirements populate `directory`.
///
/// Provisioning is best-effort: a failing integration is logged and
/// recorded in the report, and the remaining integrations still run. The
/// only hard failure is an unusable `directory`.
pub fn provision_build_into_directory(
    config: &BuildConfig,
    directory: &Path,
) -> std::result::Result<ProvisionReport, BuildError> {
    let meta = std::fs::metadata(directory).map_err(|e| BuildError::directory(directory, e))?;
    if !meta.is_dir() {
        return Err(BuildError::directory(
            directory,
            std::io::Error::other("workspace path is not a directory"),
        ));
    }

    let requirements = config.requirements();
    let mut report = ProvisionReport::default();

    for integration in config.integrations.iter() {
        let id = integration.identifier();
        let Some(requirement) = requirements.iter().find(|r| integration.is_provider(r)) else {
            debug!(integration = %id, "not a provider for this build; skipping");
            continue;
        };

        debug!(integration = %id, requirement = %requirement, "provisioning workspace");
        match integration.provide_for(config, directory) {
            Ok(()) => report.provided.push(id.to_string()),
            Err(err) => {
                warn!(
                    integration = %id,
                    error = %err,
                    "integration failed to provision workspace; continuing"
                );
                report.failed.push(ProvisionFailure {
                    integration: id.to_string(),
                    message: format!("{err:#}"),
                });
            }
        }
    }

    info!(
        provided = report.provided.len(),
        failed = report.failed.len(),
        "workspace provisioning finished"
    );

    Ok(report)
}
