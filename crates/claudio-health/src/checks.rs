//! The extra checks that only run after a 200 probe: disk usage, log
//! rotation, backup freshness, and a scan of recent log lines for trouble.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};
use claudio_core::filelog;
use regex::Regex;

const COMPONENT: &str = "health-check";

/// Percentage of a filesystem's blocks currently in use, via `statvfs`.
/// Returns `None` if the path doesn't resolve to a real mount.
fn disk_usage_percent(path: &Path) -> Option<u32> {
    let c_path = CString::new(path.to_str()?).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 || stat.f_blocks == 0 {
        return None;
    }
    let used = stat.f_blocks.saturating_sub(stat.f_bfree);
    Some(((used as f64 / stat.f_blocks as f64) * 100.0) as u32)
}

/// Check `/` and, if configured, the backup destination. Returns warning
/// strings for anything over threshold.
pub fn check_disk_usage(log_file: &Path, backup_dest: &Path, threshold_pct: u32) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut paths = vec![PathBuf::from("/")];
    if backup_dest.is_dir() {
        paths.push(backup_dest.to_path_buf());
    }
    for path in paths {
        if let Some(pct) = disk_usage_percent(&path) {
            if pct >= threshold_pct {
                filelog::warn(log_file, COMPONENT, &format!("Disk usage high: {} at {pct}%", path.display()));
                warnings.push(format!("Disk usage above {threshold_pct}%."));
            }
        }
    }
    warnings
}

/// Rename any `*.log` file over `max_size_bytes` to `<name>.1`. Best-effort:
/// a log that can't be renamed (e.g. another process has it open on some
/// platforms) is left alone rather than erroring the whole health run.
pub fn rotate_logs(log_file: &Path, installation_root: &Path, max_size_bytes: u64) -> usize {
    let mut rotated = 0;
    let Ok(entries) = std::fs::read_dir(installation_root) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        if metadata.len() > max_size_bytes {
            let rotated_path = path.with_extension("log.1");
            if std::fs::rename(&path, &rotated_path).is_ok() {
                filelog::info(log_file, COMPONENT, &format!("Rotated {} ({} bytes)", path.display(), metadata.len()));
                rotated += 1;
            }
        }
    }
    rotated
}

pub enum BackupStatus {
    Fresh,
    Stale,
    Unmounted,
}

/// Directory names look like `YYYY-MM-DD_HHMM`.
fn backup_dir_re() -> Regex {
    Regex::new(r"^(\d{4})-(\d{2})-(\d{2})_(\d{2})(\d{2})$").expect("static regex")
}

fn is_mounted(path: &Path) -> bool {
    std::process::Command::new("findmnt")
        .args(["--target", &path.to_string_lossy(), "-n", "-o", "TARGET"])
        .output()
        .ok()
        .map(|out| {
            let target = String::from_utf8_lossy(&out.stdout).trim().to_string();
            !target.is_empty() && target != "/"
        })
        .unwrap_or(true)
}

/// Mirrors the original health check: stale/unmounted backups are surfaced
/// as an alert, but a backup directory that simply doesn't exist yet (no
/// backups configured) is not an error.
pub fn check_backup_freshness(log_file: &Path, backup_dest: &Path, max_age_secs: u64) -> BackupStatus {
    let looks_like_mount = backup_dest.starts_with("/mnt") || backup_dest.starts_with("/media");
    if looks_like_mount && backup_dest.is_dir() && !is_mounted(backup_dest) {
        filelog::warn(log_file, COMPONENT, &format!("Backup destination {} is not mounted", backup_dest.display()));
        return BackupStatus::Unmounted;
    }

    let backup_dir = backup_dest.join("claudio-backups").join("hourly");
    if !backup_dir.is_dir() {
        return BackupStatus::Fresh;
    }

    let latest = backup_dir.join("latest");
    let latest = if latest.is_symlink() || latest.is_dir() {
        std::fs::canonicalize(&latest).unwrap_or(latest)
    } else {
        let Ok(entries) = std::fs::read_dir(&backup_dir) else {
            return BackupStatus::Stale;
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|n| n != "latest")
            .collect();
        names.sort();
        match names.pop() {
            Some(name) => backup_dir.join(name),
            None => return BackupStatus::Stale,
        }
    };

    let Some(dir_name) = latest.file_name().and_then(|n| n.to_str()) else {
        return BackupStatus::Stale;
    };
    let Some(caps) = backup_dir_re().captures(dir_name) else {
        return BackupStatus::Stale;
    };
    let parse = |i: usize| caps[i].parse::<u32>().unwrap_or(0);
    let Some(naive) = chrono::NaiveDate::from_ymd_opt(parse(1) as i32, parse(2), parse(3))
        .and_then(|d| d.and_hms_opt(parse(4), parse(5), 0))
    else {
        return BackupStatus::Stale;
    };
    let backup_time: NaiveDateTime = naive;
    let age = (Utc::now().naive_utc() - backup_time).num_seconds().max(0) as u64;
    if age > max_age_secs {
        filelog::warn(log_file, COMPONENT, &format!("Backup stale: last backup {age}s ago (threshold: {max_age_secs}s)"));
        BackupStatus::Stale
    } else {
        BackupStatus::Fresh
    }
}

/// Scan the trailing window of `claudio.log` for four kinds of trouble:
/// explicit errors, rapid restarts, slow AI preflight checks, and warnings.
/// Returns formatted alert text, or an empty string if nothing stands out.
/// A cooldown (checked by the caller via `HealthState`) prevents re-alerting
/// on the same burst of lines every minute.
pub fn check_recent_logs(log_file: &Path, window_secs: u64) -> String {
    let Ok(contents) = std::fs::read_to_string(log_file) else {
        return String::new();
    };
    let cutoff = Utc::now().naive_utc() - chrono::Duration::seconds(window_secs as i64);
    let ts_re = Regex::new(r"^\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\]").expect("static regex");

    let recent: Vec<&str> = contents
        .lines()
        .filter(|line| {
            ts_re
                .captures(line)
                .and_then(|c| NaiveDateTime::parse_from_str(&c[1], "%Y-%m-%d %H:%M:%S").ok())
                .is_some_and(|ts| ts >= cutoff)
        })
        .collect();
    if recent.is_empty() {
        return String::new();
    }

    let mut issues = String::new();

    let errors: Vec<&&str> = recent
        .iter()
        .filter(|l| l.contains("ERROR:") && !l.contains("Could not connect to server") && !l.contains("Cannot send alert"))
        .collect();
    if !errors.is_empty() {
        issues.push_str(&format!("{} error(s): `{}`\n", errors.len(), strip_prefix(errors[errors.len() - 1])));
    }

    let restarts = recent.iter().filter(|l| l.contains("Starting Claudio server")).count();
    if restarts >= 3 {
        issues.push_str(&format!("Server restarted {restarts} times in {window_secs}s\n"));
    }

    let preflight = recent.iter().filter(|l| l.contains("Pre-flight check is taking longer")).count();
    if preflight >= 3 {
        issues.push_str(&format!("Claude API slow ({preflight} pre-flight warnings)\n"));
    }

    let warns: Vec<&&str> = recent
        .iter()
        .filter(|l| l.contains("WARN:") && !l.contains("Disk usage") && !l.contains("Backup stale") && !l.contains("not mounted"))
        .collect();
    if !warns.is_empty() {
        issues.push_str(&format!("{} warning(s): `{}`\n", warns.len(), strip_prefix(warns[warns.len() - 1])));
    }

    issues
}

fn strip_prefix(line: &str) -> String {
    match line.find("] ") {
        Some(idx) => line[idx + 2..].to_string(),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn rotate_logs_renames_oversized_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("claudio.log"), vec![b'a'; 200]).unwrap();
        let rotated = rotate_logs(&dir.path().join("health.log"), dir.path(), 100);
        assert_eq!(rotated, 1);
        assert!(dir.path().join("claudio.log.1").exists());
    }

    #[test]
    fn rotate_logs_leaves_small_files_alone() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("claudio.log"), b"small").unwrap();
        let rotated = rotate_logs(&dir.path().join("health.log"), dir.path(), 100);
        assert_eq!(rotated, 0);
    }

    #[test]
    fn check_backup_freshness_with_no_backup_dir_is_fresh() {
        let dir = tempdir().unwrap();
        let status = check_backup_freshness(&dir.path().join("health.log"), dir.path(), 7200);
        assert!(matches!(status, BackupStatus::Fresh));
    }

    #[test]
    fn check_recent_logs_flags_repeated_errors() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("claudio.log");
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let content = format!("[{now}] ERROR: boom one\n[{now}] ERROR: boom two\n");
        fs::write(&log_path, content).unwrap();
        let issues = check_recent_logs(&log_path, 300);
        assert!(issues.contains("2 error(s)"));
    }

    #[test]
    fn check_recent_logs_ignores_stale_lines() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("claudio.log");
        fs::write(&log_path, "[2000-01-01 00:00:00] ERROR: ancient\n").unwrap();
        let issues = check_recent_logs(&log_path, 300);
        assert!(issues.is_empty());
    }
}
