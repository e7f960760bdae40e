//! Build-runner fixtures written into workspaces.
//!
//! - `success.sh`: prints to both streams, exits 0
//! - `failure.sh`: prints to both streams, exits 1
//! - `fiveminutes.sh`: records its pid in `runner.pid`, prints, then sleeps
//!   for five minutes
//! - `env.sh`: prints the `NGBUILD_*` environment, one variable per line

use std::fs;
use std::io;
use std::path::Path;

pub const SUCCESS: &str = "success.sh";
pub const FAILURE: &str = "failure.sh";
pub const FIVE_MINUTES: &str = "fiveminutes.sh";
pub const ENV: &str = "env.sh";

/// File `fiveminutes.sh` writes its pid to, relative to the workspace.
pub const PID_FILE: &str = "runner.pid";

pub const SUCCESS_STDOUT: &str = "building\nsuccess\n";
pub const SUCCESS_STDERR: &str = "warning: nothing to do\n";
pub const FAILURE_STDOUT: &str = "building\n";
pub const FAILURE_STDERR: &str = "error: build broke\n";

const SCRIPTS: &[(&str, &str)] = &[
    (
        SUCCESS,
        "#!/bin/sh\nprintf 'building\\nsuccess\\n'\nprintf 'warning: nothing to do\\n' >&2\nexit 0\n",
    ),
    (
        FAILURE,
        "#!/bin/sh\nprintf 'building\\n'\nprintf 'error: build broke\\n' >&2\nexit 1\n",
    ),
    (
        FIVE_MINUTES,
        "#!/bin/sh\necho $$ > runner.pid\necho started\nsleep 300\necho finished\n",
    ),
    (
        ENV,
        "#!/bin/sh\necho \"token=$NGBUILD_TOKEN\"\necho \"base=$NGBUILD_BASE_REPO\"\necho \"merge=${NGBUILD_MERGE_REPO:-}\"\necho \"workspace=$NGBUILD_WORKSPACE\"\necho \"cwd=$(pwd)\"\n",
    ),
];

/// Write every fixture into `dir`, executable.
pub fn write_all(dir: &Path) -> io::Result<()> {
    for (name, body) in SCRIPTS {
        let path = dir.join(name);
        fs::write(&path, body)?;
        make_executable(&path)?;
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
