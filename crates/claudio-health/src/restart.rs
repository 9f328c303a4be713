//! Auto-restart via the OS service manager: `launchctl` on macOS,
//! `systemctl --user` on Linux. Cron doesn't export `XDG_RUNTIME_DIR`, which
//! `systemctl --user` needs, so the caller sets it before invoking anything
//! here (see `main.rs`).

use std::path::Path;
use std::process::Command;

use claudio_core::filelog;

const SERVICE_NAME: &str = "claudio";
const LAUNCHD_LABEL: &str = "com.claudio.server";
const COMPONENT: &str = "health-check";

fn run(cmd: &mut Command) -> Option<std::process::Output> {
    cmd.output().ok()
}

#[cfg(target_os = "macos")]
fn service_known() -> bool {
    run(Command::new("launchctl").arg("list"))
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(LAUNCHD_LABEL))
        .unwrap_or(false)
}

#[cfg(target_os = "macos")]
fn restart_service() -> bool {
    let _ = run(Command::new("launchctl").args(["stop", LAUNCHD_LABEL]));
    run(Command::new("launchctl").args(["start", LAUNCHD_LABEL]))
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[cfg(not(target_os = "macos"))]
fn service_known() -> bool {
    run(Command::new("systemctl").args(["--user", "list-unit-files"]))
        .map(|out| String::from_utf8_lossy(&out.stdout).contains(SERVICE_NAME))
        .unwrap_or(false)
}

#[cfg(not(target_os = "macos"))]
fn restart_service() -> bool {
    run(Command::new("systemctl").args(["--user", "restart", SERVICE_NAME]))
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Restarts the gateway process via the platform's service manager. Returns
/// `true` on a successful restart command, `false` if the unit/plist isn't
/// registered or the restart command itself failed.
pub fn attempt_restart(log_file: &Path) -> bool {
    if !service_known() {
        let what = if cfg!(target_os = "macos") { "plist" } else { "unit" };
        filelog::error(log_file, COMPONENT, &format!("Service {what} not found, cannot auto-restart"));
        return false;
    }
    restart_service()
}
