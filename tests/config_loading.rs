// tests/config_loading.rs

mod common;
use crate::common::builders::{AppSectionBuilder, ConfigFileBuilder};
use crate::common::init_tracing;

use std::io::Write;
use std::time::Duration;

use tempfile::{NamedTempFile, TempDir};

use ngbuild::config::{ConfigFile, IntegrationConfig, load_and_validate};
use ngbuild::context::Context;
use ngbuild::errors::NgbuildError;
use ngbuild::shutdown::Shutdown;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn no_apps_is_a_config_error() {
    let file = config_file(
        r#"
[integration.source]
kind = "source"
"#,
    );

    match load_and_validate(file.path()) {
        Err(NgbuildError::ConfigError(msg)) => assert!(msg.contains("at least one")),
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn unknown_integration_reference_is_a_config_error() {
    let file = config_file(
        r#"
[app.web]
build_runner = "build.sh"
integrations = ["slack"]
"#,
    );

    match load_and_validate(file.path()) {
        Err(NgbuildError::ConfigError(msg)) => {
            assert!(msg.contains("unknown integration"));
            assert!(msg.contains("slack"));
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn bad_duration_is_a_config_error() {
    let file = config_file(
        r#"
[app.web]
build_runner = "build.sh"
deadline = "soon"
"#,
    );

    match load_and_validate(file.path()) {
        Err(NgbuildError::ConfigError(msg)) => assert!(msg.contains("[app.web].deadline")),
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn overflowing_deadline_is_a_config_error() {
    let file = config_file(
        r#"
[app.web]
build_runner = "build.sh"
deadline = "9999999999999999h"
"#,
    );

    match load_and_validate(file.path()) {
        Err(NgbuildError::ConfigError(msg)) => assert!(msg.contains("too large")),
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn unknown_integration_kind_is_a_toml_error() {
    let file = config_file(
        r#"
[integration.chat]
kind = "slack"

[app.web]
build_runner = "build.sh"
"#,
    );

    assert!(matches!(load_and_validate(file.path()), Err(NgbuildError::TomlError(_))));
}

#[test]
fn relative_paths_resolve_against_config_dir() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Ngbuild.toml");
    std::fs::write(
        &path,
        r#"
[config]
workspace_root = "work"
default_deadline = "5m"

[integration.scripts]
kind = "files"
from = "ci"

[app.web]
build_runner = "build.sh"
base_repo = "https://example.com/acme/web.git"
"#,
    )
    .unwrap();

    let cfg = load_and_validate(&path).unwrap();
    assert_eq!(cfg.workspace_root, Some(dir.path().join("work")));
    assert_eq!(
        cfg.integrations["scripts"],
        IntegrationConfig::Files {
            from: dir.path().join("ci"),
            providers: vec!["*".to_string()],
        }
    );

    let app = &cfg.apps["web"];
    assert_eq!(app.deadline, Duration::from_secs(300));
    assert_eq!(app.integrations, vec!["scripts".to_string()]);
}

#[tokio::test]
async fn context_builds_registries_from_config() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let cfg: ConfigFile = ConfigFileBuilder::new()
        .workspace_root(root.path())
        .with_source("source", &["github.com"])
        .with_files("scripts", root.path().join("ci"))
        .with_app("web", AppSectionBuilder::new("build.sh").integration("source").build())
        .with_app("api", AppSectionBuilder::new("make.sh").deadline("2m").build())
        .build();

    let ctx = Context::from_config(&cfg, Shutdown::new()).unwrap();

    let ids: Vec<_> = ctx.integrations().iter().map(|i| i.identifier().to_string()).collect();
    assert_eq!(ids, vec!["scripts".to_string(), "source".to_string()]);

    let web = ctx.app("web").unwrap();
    assert_eq!(web.integrations().len(), 1);
    assert_eq!(web.integrations()[0].identifier(), "source");

    let api = ctx.app("api").unwrap();
    assert_eq!(api.integrations().len(), 2);
    assert_eq!(api.config().deadline, Duration::from_secs(120));
    assert!(ctx.app("missing").is_none());
}
