//! The three small on-disk stamp files that let fail-count and cooldown
//! state survive this process exiting between invocations (cron runs this
//! binary fresh every minute; nothing here is long-lived).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct HealthState {
    restart_stamp: PathBuf,
    fail_count_file: PathBuf,
    log_alert_stamp: PathBuf,
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Atomic write-then-rename, so a crash mid-write never leaves a torn file.
fn write_atomic(path: &Path, contents: &str) {
    let tmp = path.with_extension("tmp");
    if std::fs::write(&tmp, contents).is_ok() {
        let _ = std::fs::rename(&tmp, path);
    }
}

impl HealthState {
    pub fn new(installation_root: &Path) -> Self {
        Self {
            restart_stamp: installation_root.join(".last_restart_attempt"),
            fail_count_file: installation_root.join(".restart_fail_count"),
            log_alert_stamp: installation_root.join(".last_log_alert"),
        }
    }

    pub fn fail_count(&self) -> u32 {
        std::fs::read_to_string(&self.fail_count_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn set_fail_count(&self, n: u32) {
        write_atomic(&self.fail_count_file, &n.to_string());
    }

    pub fn last_restart_attempt(&self) -> Option<u64> {
        std::fs::read_to_string(&self.restart_stamp).ok().and_then(|s| s.trim().parse().ok())
    }

    pub fn touch_restart_stamp(&self) {
        write_atomic(&self.restart_stamp, &now_epoch().to_string());
    }

    pub fn remove_restart_stamp(&self) {
        let _ = std::fs::remove_file(&self.restart_stamp);
    }

    /// 200 clears both the fail count and the throttle stamp.
    pub fn clear_fail_state(&self) {
        let _ = std::fs::remove_file(&self.restart_stamp);
        let _ = std::fs::remove_file(&self.fail_count_file);
    }

    pub fn seconds_since_last_log_alert(&self) -> Option<u64> {
        let last: u64 = std::fs::read_to_string(&self.log_alert_stamp).ok()?.trim().parse().ok()?;
        Some(now_epoch().saturating_sub(last))
    }

    pub fn touch_log_alert_stamp(&self) {
        write_atomic(&self.log_alert_stamp, &now_epoch().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fail_count_round_trips() {
        let dir = tempdir().unwrap();
        let state = HealthState::new(dir.path());
        assert_eq!(state.fail_count(), 0);
        state.set_fail_count(2);
        assert_eq!(state.fail_count(), 2);
    }

    #[test]
    fn clear_fail_state_removes_both_files() {
        let dir = tempdir().unwrap();
        let state = HealthState::new(dir.path());
        state.set_fail_count(3);
        state.touch_restart_stamp();
        state.clear_fail_state();
        assert_eq!(state.fail_count(), 0);
        assert!(state.last_restart_attempt().is_none());
    }

    #[test]
    fn log_alert_cooldown_reads_back() {
        let dir = tempdir().unwrap();
        let state = HealthState::new(dir.path());
        assert!(state.seconds_since_last_log_alert().is_none());
        state.touch_log_alert_stamp();
        assert!(state.seconds_since_last_log_alert().unwrap() < 5);
    }
}
