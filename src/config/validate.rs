// src/config/validate.rs

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{AppConfig, AppSection, ConfigFile, RawConfigFile};
use crate::errors::{NgbuildError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::NgbuildError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_apps(&raw)?;
        let default_deadline = parse_deadline("[config].default_deadline", &raw.config.default_deadline)?;

        let mut apps = BTreeMap::new();
        for (name, section) in raw.app.iter() {
            let app = validate_app(name, section, &raw, default_deadline)?;
            apps.insert(name.clone(), app);
        }

        Ok(ConfigFile::new_unchecked(
            raw.config.workspace_root,
            raw.integration,
            apps,
        ))
    }
}

fn ensure_has_apps(cfg: &RawConfigFile) -> Result<()> {
    if cfg.app.is_empty() {
        return Err(NgbuildError::ConfigError(
            "config must contain at least one [app.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_app(
    name: &str,
    section: &AppSection,
    cfg: &RawConfigFile,
    default_deadline: Duration,
) -> Result<AppConfig> {
    if section.build_runner.trim().is_empty() {
        return Err(NgbuildError::ConfigError(format!(
            "app '{}' has an empty `build_runner`",
            name
        )));
    }

    let deadline = match section.deadline {
        Some(ref s) => parse_deadline(&format!("[app.{}].deadline", name), s)?,
        None => default_deadline,
    };

    let integrations = match section.integrations {
        Some(ref names) => {
            for integration in names {
                if !cfg.integration.contains_key(integration) {
                    return Err(NgbuildError::ConfigError(format!(
                        "app '{}' references unknown integration '{}'",
                        name, integration
                    )));
                }
            }
            names.clone()
        }
        None => cfg.integration.keys().cloned().collect(),
    };

    Ok(AppConfig {
        build_runner: section.build_runner.clone(),
        deadline,
        requires: section.requires.clone(),
        integrations,
        base_repo: section.base_repo.clone(),
    })
}

fn parse_deadline(field: &str, value: &str) -> Result<Duration> {
    let deadline = parse_duration(value)
        .map_err(|e| NgbuildError::ConfigError(format!("{}: {}", field, e)))?;
    if deadline.is_zero() {
        return Err(NgbuildError::ConfigError(format!(
            "{} must be greater than zero",
            field
        )));
    }
    Ok(deadline)
}
