// src/integration/source.rs

//! Source-control integration.
//!
//! Provides for requirements that look like repository references and writes
//! a small checkout toolkit into the workspace:
//!
//! - `.ngbuild/source.env`: shell-sourceable base/merge references
//! - `.ngbuild/checkout.sh`: clones the base reference into `src/` and pulls
//!   the merge reference on top, if any
//!
//! It also owns the event routes for the apps it is attached to. The HTTP
//! layer (outside this crate) maps an incoming request to a route and calls
//! [`SourceIntegration::deliver`] with the raw payload.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use crate::app::App;
use crate::build::BuildConfig;
use crate::errors::NgbuildError;
use crate::integration::Integration;

const CHECKOUT_SCRIPT: &str = r#"#!/bin/sh
set -eu
. "$(dirname "$0")/source.env"
git clone --quiet "$NGBUILD_BASE_REPO" src
if [ -n "${NGBUILD_MERGE_REPO:-}" ]; then
    git -C src pull --quiet --no-edit "$NGBUILD_MERGE_REPO"
fi
"#;

#[derive(Debug)]
pub struct SourceIntegration {
    identifier: String,
    hosts: Vec<String>,
    routes: Mutex<BTreeMap<String, Weak<App>>>,
}

impl SourceIntegration {
    /// `hosts` restricts which repository hosts this integration answers
    /// for; an empty list accepts any repository reference.
    pub fn new(identifier: impl Into<String>, hosts: Vec<String>) -> Self {
        Self {
            identifier: identifier.into(),
            hosts,
            routes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Event route for an app, e.g. `/source/web`.
    pub fn route_for(&self, app_name: &str) -> String {
        format!("/{}/{}", self.identifier, app_name)
    }

    /// Currently registered routes, sorted.
    pub fn routes(&self) -> Vec<String> {
        let routes = self.routes.lock().unwrap_or_else(|p| p.into_inner());
        routes.keys().cloned().collect()
    }

    /// Forward a raw event payload to the app registered on `route`.
    ///
    /// Unknown routes (or apps that have gone away) yield
    /// [`NgbuildError::AppNotFound`]; malformed payloads yield
    /// [`NgbuildError::Event`] after the app has logged and dropped them.
    pub fn deliver(&self, route: &str, payload: &[u8]) -> crate::errors::Result<()> {
        let app = {
            let routes = self.routes.lock().unwrap_or_else(|p| p.into_inner());
            routes.get(route).and_then(Weak::upgrade)
        };

        match app {
            Some(app) => {
                debug!(route = %route, bytes = payload.len(), "delivering event");
                app.handle_payload(payload)?;
                Ok(())
            }
            None => Err(NgbuildError::AppNotFound(route.to_string())),
        }
    }

    fn accepts_host(&self, requirement: &str) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        match repository_host(requirement) {
            Some(host) => self.hosts.iter().any(|h| h.eq_ignore_ascii_case(host)),
            None => false,
        }
    }
}

impl Integration for SourceIntegration {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn is_provider(&self, requirement: &str) -> bool {
        looks_like_repository(requirement) && self.accepts_host(requirement)
    }

    fn provide_for(&self, config: &BuildConfig, directory: &Path) -> Result<()> {
        let tools = directory.join(".ngbuild");
        fs::create_dir_all(&tools).with_context(|| format!("creating {:?}", tools))?;

        let mut env = format!("NGBUILD_BASE_REPO={}\n", shell_quote(&config.base_repo));
        if let Some(ref merge) = config.merge_repo {
            env.push_str(&format!("NGBUILD_MERGE_REPO={}\n", shell_quote(merge)));
        }
        fs::write(tools.join("source.env"), env).context("writing source.env")?;

        let script = tools.join("checkout.sh");
        fs::write(&script, CHECKOUT_SCRIPT).context("writing checkout.sh")?;
        make_executable(&script)?;

        debug!(integration = %self.identifier, dir = ?directory, "wrote checkout tooling");
        Ok(())
    }

    fn attach_to_app(&self, app: &Arc<App>) -> Result<()> {
        let route = self.route_for(app.name());
        let mut routes = self.routes.lock().unwrap_or_else(|p| p.into_inner());

        if routes.get(&route).and_then(Weak::upgrade).is_some() {
            return Err(anyhow!("route {} is already attached", route));
        }
        routes.insert(route.clone(), Arc::downgrade(app));

        info!(integration = %self.identifier, app = %app.name(), route = %route, "attached to app");
        Ok(())
    }

    fn shutdown(&self) {
        let mut routes = self.routes.lock().unwrap_or_else(|p| p.into_inner());
        let count = routes.len();
        routes.clear();
        info!(integration = %self.identifier, routes = count, "source integration shut down");
    }
}

/// `https://host/...`, `ssh://git@host:22/...`, `git@host:org/repo`, or any
/// path ending in `.git`.
fn looks_like_repository(requirement: &str) -> bool {
    requirement.contains("://") || requirement.starts_with("git@") || requirement.ends_with(".git")
}

fn repository_host(reference: &str) -> Option<&str> {
    let authority = if let Some((_, rest)) = reference.split_once("://") {
        rest.split('/').next()?
    } else if let Some(rest) = reference.strip_prefix("git@") {
        return rest.split(':').next().filter(|h| !h.is_empty());
    } else {
        return None;
    };

    let host_port = authority.rsplit('@').next()?;
    let host = host_port.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("chmod {:?}", path))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
