// tests/build_lifecycle.rs

mod common;
use crate::common::builders::BuildConfigBuilder;
use crate::common::{FakeIntegration, Provide, init_tracing, scripts, with_timeout};

use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use ngbuild::build::{Build, BuildOutcome, BuildState};
use ngbuild::errors::BuildError;
use ngbuild::integration::Integration;

fn read_all(mut reader: impl Read) -> String {
    let mut out = String::new();
    reader.read_to_string(&mut out).unwrap();
    out
}

async fn wait_for_directory(build: &Build) -> std::path::PathBuf {
    for _ in 0..200 {
        if let Some(dir) = build.directory() {
            return dir;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("build never provisioned a workspace");
}

#[tokio::test]
async fn successful_build_captures_output_until_last_unref() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let build = BuildConfigBuilder::new(scripts::SUCCESS)
        .integration(FakeIntegration::scripts("scripts").into_arc())
        .build_in(root.path());

    build.add_ref();
    with_timeout(build.run()).await.unwrap();

    assert_eq!(build.state(), BuildState::Stopped);
    assert_eq!(build.outcome(), Some(BuildOutcome::Succeeded));
    assert_eq!(read_all(build.stdout().unwrap()), scripts::SUCCESS_STDOUT);
    assert_eq!(read_all(build.stderr().unwrap()), scripts::SUCCESS_STDERR);

    let dir = build.directory().expect("workspace kept while referenced");
    assert!(dir.starts_with(root.path()));

    build.unref();
    assert!(build.is_released());
    assert!(!dir.exists());
    assert!(build.directory().is_none());
    assert!(matches!(build.stdout(), Err(BuildError::OutputReleased(_))));
}

#[tokio::test]
async fn failing_build_reports_exit_code_and_keeps_output() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let build = BuildConfigBuilder::new(scripts::FAILURE)
        .integration(FakeIntegration::scripts("scripts").into_arc())
        .build_in(root.path());
    let held = build.hold();

    let err = with_timeout(held.run()).await.unwrap_err();
    assert!(matches!(err, BuildError::BuildFailure { code: Some(1) }));
    assert_eq!(held.outcome(), Some(BuildOutcome::Failed { code: Some(1) }));
    assert_eq!(read_all(held.stdout().unwrap()), scripts::FAILURE_STDOUT);
    assert_eq!(read_all(held.stderr().unwrap()), scripts::FAILURE_STDERR);
}

#[tokio::test]
async fn unreferenced_build_releases_on_stop() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let build = BuildConfigBuilder::new(scripts::SUCCESS)
        .integration(FakeIntegration::scripts("scripts").into_arc())
        .build_in(root.path());

    with_timeout(build.run()).await.unwrap();

    assert!(build.is_released());
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn runner_sees_build_environment() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let build = BuildConfigBuilder::new(scripts::ENV)
        .base_repo("https://example.com/acme/web.git")
        .merge_repo("https://example.com/alice/web.git")
        .token("tok-42")
        .integration(FakeIntegration::scripts("scripts").into_arc())
        .build_in(root.path());
    let held = build.hold();

    with_timeout(held.run()).await.unwrap();
    let dir = held.directory().unwrap();
    let out = read_all(held.stdout().unwrap());

    assert!(out.contains("token=tok-42\n"));
    assert!(out.contains("base=https://example.com/acme/web.git\n"));
    assert!(out.contains("merge=https://example.com/alice/web.git\n"));
    assert!(out.contains(&format!("workspace={}\n", dir.display())));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn deadline_kills_runner_and_keeps_partial_output() {
    use crate::common::{process_alive, read_runner_pid};

    init_tracing();
    let root = TempDir::new().unwrap();
    let build = BuildConfigBuilder::new(scripts::FIVE_MINUTES)
        .deadline(Duration::from_secs(1))
        .integration(FakeIntegration::scripts("scripts").into_arc())
        .build_in(root.path());
    let held = build.hold();

    let started = Instant::now();
    let task = tokio::spawn({
        let build = Arc::clone(&build);
        async move { build.run().await }
    });

    let dir = wait_for_directory(&held).await;
    let pid = read_runner_pid(&dir).await;
    assert!(process_alive(pid));

    let err = with_timeout(task).await.unwrap().unwrap_err();
    assert!(matches!(err, BuildError::DeadlineExceeded { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(held.outcome(), Some(BuildOutcome::DeadlineExceeded));
    assert!(!process_alive(pid), "runner {pid} survived the deadline");
    assert_eq!(read_all(held.stdout().unwrap()), "started\n");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn dropping_the_run_future_cancels_the_build() {
    use crate::common::{process_alive, read_runner_pid};

    init_tracing();
    let root = TempDir::new().unwrap();
    let build = BuildConfigBuilder::new(scripts::FIVE_MINUTES)
        .integration(FakeIntegration::scripts("scripts").into_arc())
        .build_in(root.path());

    let task = tokio::spawn({
        let build = Arc::clone(&build);
        async move { build.run().await }
    });
    let dir = wait_for_directory(&build).await;
    let pid = read_runner_pid(&dir).await;

    task.abort();
    let _ = task.await;

    assert_eq!(build.state(), BuildState::Stopped);
    assert_eq!(build.outcome(), Some(BuildOutcome::Cancelled));
    assert!(build.is_released());
    assert!(!dir.exists());

    // SIGKILL delivery is asynchronous.
    for _ in 0..100 {
        if !process_alive(pid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("runner {pid} survived cancellation");
}

#[tokio::test]
async fn slow_provisioning_does_not_stall_the_runtime() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let build = BuildConfigBuilder::new(scripts::SUCCESS)
        .integration(FakeIntegration::new("slow").provide(Provide::Slow(Duration::from_millis(400))).into_arc())
        .build_in(root.path());

    // Counts timer ticks until the workspace is handed to the runner.
    let ticker = tokio::spawn({
        let build = Arc::clone(&build);
        async move {
            let mut ticks = 0;
            while build.directory().is_none() && build.state() != BuildState::Stopped {
                ticks += 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            ticks
        }
    });

    with_timeout(build.run()).await.unwrap();
    let ticks = ticker.await.unwrap();
    assert!(ticks >= 10, "runtime stalled during provisioning ({ticks} ticks)");
}

#[tokio::test]
async fn cancelling_during_provisioning_removes_the_workspace() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let slow = Arc::new(FakeIntegration::new("slow").provide(Provide::Slow(Duration::from_millis(300))));
    let build = BuildConfigBuilder::new(scripts::SUCCESS)
        .integration(slow.clone() as Arc<dyn Integration>)
        .build_in(root.path());

    let task = tokio::spawn({
        let build = Arc::clone(&build);
        async move { build.run().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    let _ = task.await;

    assert_eq!(build.outcome(), Some(BuildOutcome::Cancelled));
    assert!(build.is_released());

    for _ in 0..200 {
        if !slow.provided().is_empty() && std::fs::read_dir(root.path()).unwrap().count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("workspace of the cancelled build was left behind");
}

#[tokio::test]
async fn second_run_is_already_started() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let build = BuildConfigBuilder::new(scripts::SUCCESS)
        .integration(FakeIntegration::scripts("scripts").into_arc())
        .build_in(root.path());

    with_timeout(build.run()).await.unwrap();
    let err = build.run().await.unwrap_err();
    assert!(matches!(err, BuildError::AlreadyStarted(ref t) if t == build.token()));
}

#[tokio::test]
async fn missing_runner_is_spawn_error() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let build = BuildConfigBuilder::new("does-not-exist.sh").build_in(root.path());
    build.add_ref();

    let err = with_timeout(build.run()).await.unwrap_err();
    assert!(matches!(err, BuildError::ProcessSpawn { .. }));
    assert_eq!(build.state(), BuildState::Stopped);

    let dir = build.directory().unwrap();
    build.unref();
    assert!(!dir.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn unusable_workspace_root_fails_before_spawning() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let not_a_dir = root.path().join("file");
    std::fs::write(&not_a_dir, b"").unwrap();

    let fake = Arc::new(FakeIntegration::scripts("scripts"));
    let build = BuildConfigBuilder::new(scripts::SUCCESS)
        .integration(fake.clone() as Arc<dyn Integration>)
        .build_in(&not_a_dir);

    let err = with_timeout(build.run()).await.unwrap_err();
    assert!(matches!(err, BuildError::Directory { .. }));
    assert_eq!(build.state(), BuildState::Stopped);
    assert!(matches!(build.outcome(), Some(BuildOutcome::Errored(_))));
    assert!(fake.provided().is_empty());
}

#[tokio::test]
async fn provisioning_failures_do_not_abort_the_build() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let broken = Arc::new(FakeIntegration::new("broken").provide(Provide::Fail("no credentials".into())));
    let skipped = Arc::new(FakeIntegration::new("skipped").answer(false));
    let scripts_fake = Arc::new(FakeIntegration::scripts("scripts"));

    let build = BuildConfigBuilder::new(scripts::SUCCESS)
        .integration(broken.clone() as Arc<dyn Integration>)
        .integration(skipped.clone() as Arc<dyn Integration>)
        .integration(scripts_fake.clone() as Arc<dyn Integration>)
        .build_in(root.path());

    with_timeout(build.run()).await.unwrap();

    assert_eq!(broken.provided().len(), 1);
    assert!(skipped.provided().is_empty());
    assert_eq!(scripts_fake.provided().len(), 1);
    assert_eq!(build.provisioned_integrations(), vec!["scripts".to_string()]);

    let failures = build.provision_failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].integration, "broken");
    assert!(failures[0].message.contains("no credentials"));
}

#[tokio::test]
async fn provider_for_merge_target_only_is_called_once() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let merge_only = Arc::new(FakeIntegration::new("merge").only_for("merge-ref"));
    let build = BuildConfigBuilder::new(scripts::SUCCESS)
        .base_repo("base-ref")
        .merge_repo("merge-ref")
        .requirement("merge-ref")
        .integration(FakeIntegration::scripts("scripts").into_arc())
        .integration(merge_only.clone() as Arc<dyn Integration>)
        .build_in(root.path());

    with_timeout(build.run()).await.unwrap();
    assert_eq!(merge_only.provided().len(), 1);
}

#[tokio::test]
async fn concurrent_ref_unref_releases_exactly_once() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let build = BuildConfigBuilder::new(scripts::SUCCESS)
        .integration(FakeIntegration::scripts("scripts").into_arc())
        .build_in(root.path());

    build.add_ref();
    with_timeout(build.run()).await.unwrap();
    let dir = build.directory().unwrap();

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let build = Arc::clone(&build);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let held = build.hold();
                    let _ = held.stdout().unwrap();
                    drop(held);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert!(!build.is_released());
    assert_eq!(build.ref_count(), 1);
    assert!(dir.exists());

    build.unref();
    assert!(build.is_released());
    assert!(!dir.exists());
}

#[tokio::test]
async fn concurrent_builds_get_distinct_workspaces() {
    init_tracing();
    let root = TempDir::new().unwrap();
    let builds: Vec<_> = (0..4)
        .map(|_| {
            BuildConfigBuilder::new(scripts::SUCCESS)
                .integration(FakeIntegration::scripts("scripts").into_arc())
                .build_in(root.path())
        })
        .collect();
    for b in &builds {
        b.add_ref();
    }

    let tasks: Vec<_> = builds
        .iter()
        .map(|b| {
            let b = Arc::clone(b);
            tokio::spawn(async move { b.run().await })
        })
        .collect();
    for task in tasks {
        with_timeout(task).await.unwrap().unwrap();
    }

    let dirs: std::collections::HashSet<_> = builds.iter().map(|b| b.directory().unwrap()).collect();
    assert_eq!(dirs.len(), 4);
    for b in &builds {
        b.unref();
    }
}

#[cfg(unix)]
#[tokio::test]
async fn files_and_source_integrations_populate_workspace() {
    use ngbuild::integration::{FilesIntegration, SourceIntegration};

    init_tracing();
    let root = TempDir::new().unwrap();
    let ci = TempDir::new().unwrap();
    scripts::write_all(ci.path()).unwrap();

    let build = BuildConfigBuilder::new(scripts::SUCCESS)
        .base_repo("https://github.com/acme/web.git")
        .merge_repo("https://github.com/alice/web.git")
        .integration(Arc::new(FilesIntegration::new("scripts", ci.path(), vec!["*".to_string()])))
        .integration(Arc::new(SourceIntegration::new("source", vec!["github.com".to_string()])))
        .build_in(root.path());
    let held = build.hold();

    with_timeout(held.run()).await.unwrap();
    assert!(held.provision_failures().is_empty());

    let dir = held.directory().unwrap();
    let env = std::fs::read_to_string(dir.join(".ngbuild/source.env")).unwrap();
    assert_eq!(
        env,
        "NGBUILD_BASE_REPO='https://github.com/acme/web.git'\nNGBUILD_MERGE_REPO='https://github.com/alice/web.git'\n"
    );
    assert!(dir.join(".ngbuild/checkout.sh").is_file());
    assert_eq!(read_all(held.stdout().unwrap()), scripts::SUCCESS_STDOUT);
}
