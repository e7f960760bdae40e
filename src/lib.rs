// src/lib.rs

pub mod app;
pub mod build;
pub mod cli;
pub mod config;
pub mod context;
pub mod errors;
pub mod integration;
pub mod logging;
pub mod shutdown;
pub mod types;
pub mod workspace;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use tracing::{debug, info, warn};

use crate::app::App;
use crate::build::Build;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, IntegrationConfig};
use crate::context::Context;
use crate::errors::NgbuildError;
use crate::shutdown::{Shutdown, listen_for_signals};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - integration and app registries
/// - Ctrl-C / SIGTERM handling and ordered shutdown
/// - one of: dry-run listing, a one-shot build, a single event dispatch,
///   or serving until a signal arrives
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let shutdown = Shutdown::new();
    let ctx = Context::from_config(&cfg, shutdown.clone())?;
    let _signals = listen_for_signals(shutdown.clone());

    let result = match args.app {
        Some(ref name) => {
            let app = ctx
                .app(name)
                .ok_or_else(|| NgbuildError::AppNotFound(name.clone()))?
                .clone();
            match args.event {
                Some(ref path) => dispatch_event(&ctx, &app, path).await,
                None => run_one_shot(&app, &args, &shutdown).await,
            }
        }
        None => serve(&ctx).await,
    };

    ctx.shutdown().await;
    result
}

/// Build once and copy the captured output to the terminal.
async fn run_one_shot(app: &App, args: &CliArgs, shutdown: &Shutdown) -> Result<()> {
    let Some(base_repo) = args.base_repo.clone().or_else(|| app.config().base_repo.clone()) else {
        bail!(NgbuildError::ConfigError(format!(
            "app '{}' has no base_repo; pass --base-repo",
            app.name()
        )));
    };

    let build = app.create_build(&base_repo, args.merge_repo.as_deref());
    let held = build.hold();

    // Losing the race drops the run future, which cancels the build.
    let result = tokio::select! {
        res = held.run() => Some(res),
        _ = shutdown.wait() => None,
    };

    debug!(integrations = ?held.provisioned_integrations(), "workspace provisioned");
    for failure in held.provision_failures() {
        warn!(integration = %failure.integration, error = %failure.message, "integration did not provision");
    }
    copy_output(&held)?;

    match result {
        Some(res) => Ok(res?),
        None => bail!("build {} interrupted", held.token()),
    }
}

fn copy_output(build: &Build) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    std::io::copy(&mut build.stdout()?, &mut stdout).context("copying build stdout")?;
    stdout.flush()?;

    let mut stderr = std::io::stderr().lock();
    std::io::copy(&mut build.stderr()?, &mut stderr).context("copying build stderr")?;
    Ok(())
}

/// Deliver one change event from a JSON file and wait for the builds it
/// started.
async fn dispatch_event(ctx: &Context, app: &App, path: &Path) -> Result<()> {
    ctx.attach_all();
    let payload = std::fs::read(path).with_context(|| format!("reading event {:?}", path))?;
    app.handle_payload(&payload).map_err(NgbuildError::from)?;

    tokio::select! {
        _ = app.wait_idle() => info!(app = %app.name(), "event builds finished"),
        _ = ctx.shutdown_token().wait() => warn!(app = %app.name(), "interrupted while waiting for builds"),
    }

    for build in app.builds() {
        info!(token = %build.token(), outcome = ?build.outcome(), "build result");
    }
    Ok(())
}

/// Attach integrations and wait for a shutdown signal.
async fn serve(ctx: &Context) -> Result<()> {
    ctx.attach_all();
    info!(
        integrations = ?ctx.integrations().iter().map(|i| i.identifier()).collect::<Vec<_>>(),
        apps = ?ctx.apps().iter().map(|a| a.name()).collect::<Vec<_>>(),
        "ngbuild ready"
    );
    ctx.shutdown_token().wait().await;
    Ok(())
}

/// Simple dry-run output: print integrations and apps.
fn print_dry_run(cfg: &ConfigFile) {
    println!("ngbuild dry-run");
    match cfg.workspace_root {
        Some(ref root) => println!("  config.workspace_root = {}", root.display()),
        None => println!("  config.workspace_root = (default) {}", workspace::Workspaces::default_root().display()),
    }
    println!();

    println!("integrations ({}):", cfg.integrations.len());
    for (id, integration) in cfg.integrations.iter() {
        match integration {
            IntegrationConfig::Source { hosts } => {
                println!("  - {id} (source)");
                if !hosts.is_empty() {
                    println!("      hosts: {:?}", hosts);
                }
            }
            IntegrationConfig::Files { from, providers } => {
                println!("  - {id} (files)");
                println!("      from: {}", from.display());
                println!("      providers: {:?}", providers);
            }
        }
    }
    println!();

    println!("apps ({}):", cfg.apps.len());
    for (name, app) in cfg.apps.iter() {
        println!("  - {name}");
        println!("      build_runner: {}", app.build_runner);
        println!("      deadline: {:?}", app.deadline);
        if !app.requires.is_empty() {
            println!("      requires: {:?}", app.requires);
        }
        println!("      integrations: {:?}", app.integrations);
        if let Some(ref base) = app.base_repo {
            println!("      base_repo: {base}");
        }
    }

    debug!("dry-run complete (no execution)");
}
