//! Direct, best-effort appends to `claudio.log` in the bracketed format the
//! health controller's own log scan expects: `[YYYY-MM-DD HH:MM:SS] [component] LEVEL: msg`.
//!
//! This runs alongside normal `tracing` output, not instead of it — `tracing`
//! is for operators tailing stdout/journalctl, this is the on-disk trail the
//! health controller reads back.

use std::io::Write as _;
use std::path::Path;

fn append(log_file: &Path, component: &str, line: &str) {
    if let Some(parent) = log_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(log_file) else {
        return;
    };
    let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let _ = writeln!(f, "[{ts}] [{component}] {line}");
}

pub fn info(log_file: &Path, component: &str, msg: &str) {
    tracing::info!("{msg}");
    append(log_file, component, msg);
}

pub fn warn(log_file: &Path, component: &str, msg: &str) {
    tracing::warn!("{msg}");
    append(log_file, component, &format!("WARN: {msg}"));
}

pub fn error(log_file: &Path, component: &str, msg: &str) {
    tracing::error!("{msg}");
    append(log_file, component, &format!("ERROR: {msg}"));
}
