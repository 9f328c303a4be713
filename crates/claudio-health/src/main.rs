//! One-shot health probe and auto-recovery controller, invoked once a
//! minute by cron. Not a long-lived process: every run loads state from
//! disk, does its work, and exits.

mod alert;
mod checks;
mod restart;
mod state;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use claudio_config::InstallationConfig;
use claudio_core::filelog;
use reqwest::StatusCode;
use state::HealthState;
use tracing::warn;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_RESTART_INTERVAL: Duration = Duration::from_secs(180);
const COMPONENT: &str = "health-check";

#[derive(Parser, Debug)]
#[command(name = "claudio-health", about = "Probes the gateway's /health endpoint and auto-restarts it when down")]
struct Cli {
    #[arg(long, env = "CLAUDIO_HOME", default_value = "~/.claudio")]
    installation_root: PathBuf,
}

fn expand_home(path: PathBuf) -> PathBuf {
    let Some(raw) = path.to_str() else { return path };
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path
}

/// Cron doesn't set `XDG_RUNTIME_DIR`, which `systemctl --user` needs to
/// find the user's session bus on Linux.
fn ensure_xdg_runtime_dir() {
    if cfg!(target_os = "macos") || std::env::var_os("XDG_RUNTIME_DIR").is_some() {
        return;
    }
    let uid = unsafe { libc::getuid() };
    std::env::set_var("XDG_RUNTIME_DIR", format!("/run/user/{uid}"));
}

/// Telegram credentials from the first configured bot, used purely for the
/// out-of-band alert path — this has nothing to do with routing.
fn alert_credentials(installation_root: &std::path::Path) -> (String, String) {
    match claudio_config::bot::discover_bots(installation_root) {
        Ok(bots) => bots
            .iter()
            .find_map(|b| b.telegram.as_ref().map(|tg| (tg.bot_token.clone(), tg.chat_id.clone())))
            .unwrap_or_default(),
        Err(err) => {
            warn!(error = %err, "failed to load bots for alert credentials");
            Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "claudio_health=info".into()))
        .init();

    let cli = Cli::parse();
    let installation_root = expand_home(cli.installation_root);
    ensure_xdg_runtime_dir();

    let install = InstallationConfig::load(installation_root.clone());
    let state = HealthState::new(&installation_root);
    let log_file = installation_root.join("claudio.log");

    let url = format!("http://localhost:{}/health", install.port);
    let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build().unwrap_or_default();

    match client.get(&url).send().await {
        Ok(resp) if resp.status() == StatusCode::OK => {
            handle_healthy(&install, &state, &log_file).await;
            std::process::ExitCode::SUCCESS
        }
        Ok(resp) if resp.status() == StatusCode::SERVICE_UNAVAILABLE => {
            filelog::error(&log_file, COMPONENT, "Health check returned unhealthy (503)");
            std::process::ExitCode::FAILURE
        }
        Ok(resp) => {
            filelog::error(&log_file, COMPONENT, &format!("Unexpected response (HTTP {})", resp.status()));
            std::process::ExitCode::FAILURE
        }
        Err(err) if err.is_connect() || err.is_timeout() => {
            handle_unreachable(&install, &state, &installation_root, &log_file).await;
            std::process::ExitCode::FAILURE
        }
        Err(err) => {
            filelog::error(&log_file, COMPONENT, &format!("Health probe request failed: {err}"));
            std::process::ExitCode::FAILURE
        }
    }
}

async fn handle_healthy(install: &InstallationConfig, state: &HealthState, log_file: &std::path::Path) {
    state.clear_fail_state();

    let mut alerts = String::new();

    for warning in checks::check_disk_usage(log_file, &install.backup_dest, install.disk_usage_threshold_pct) {
        alerts.push_str(&warning);
        alerts.push(' ');
    }

    checks::rotate_logs(log_file, &install.installation_root, install.log_max_size_bytes);

    match checks::check_backup_freshness(log_file, &install.backup_dest, install.backup_max_age_secs) {
        checks::BackupStatus::Unmounted => alerts.push_str(&format!("Backup destination not mounted ({}). ", install.backup_dest.display())),
        checks::BackupStatus::Stale => alerts.push_str("Backups are stale. "),
        checks::BackupStatus::Fresh => {}
    }

    let cooldown_elapsed = state.seconds_since_last_log_alert().map(|s| s >= install.log_alert_cooldown_secs).unwrap_or(true);
    if cooldown_elapsed {
        let log_issues = checks::check_recent_logs(log_file, install.log_check_window_secs);
        if !log_issues.is_empty() {
            alerts.push_str("\nLog issues detected:\n");
            alerts.push_str(&log_issues);
            state.touch_log_alert_stamp();
        }
    }

    if !alerts.is_empty() {
        let (token, chat_id) = alert_credentials(&install.installation_root);
        alert::send_alert(log_file, &token, &chat_id, &format!("\u{26a0}\u{fe0f} Health check warnings: {alerts}")).await;
    } else {
        tracing::info!("health check OK");
    }
}

async fn handle_unreachable(
    install: &InstallationConfig,
    state: &HealthState,
    installation_root: &std::path::Path,
    log_file: &std::path::Path,
) {
    filelog::error(log_file, COMPONENT, &format!("Could not connect to server on port {}", install.port));

    let fail_count = state.fail_count();
    if fail_count >= install.health_max_restarts {
        filelog::info(
            log_file,
            COMPONENT,
            &format!("Restart skipped (already attempted {fail_count} times, manual intervention required)"),
        );
        return;
    }

    if let Some(last) = state.last_restart_attempt() {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .saturating_sub(last);
        if elapsed < MIN_RESTART_INTERVAL.as_secs() {
            filelog::info(
                log_file,
                COMPONENT,
                &format!("Restart skipped (last attempt {elapsed}s ago, throttle: {}s)", MIN_RESTART_INTERVAL.as_secs()),
            );
            return;
        }
    }

    state.touch_restart_stamp();
    let restarted = restart::attempt_restart(log_file);
    let new_count = fail_count + 1;
    state.set_fail_count(new_count);

    if restarted {
        filelog::info(log_file, COMPONENT, &format!("Service restarted (attempt {new_count}/{})", install.health_max_restarts));
    } else {
        state.remove_restart_stamp();
        filelog::error(
            log_file,
            COMPONENT,
            &format!("Failed to restart service (attempt {new_count}/{})", install.health_max_restarts),
        );
    }

    if new_count >= install.health_max_restarts {
        filelog::error(log_file, COMPONENT, "Max restart attempts reached, sending alert");
        let (token, chat_id) = alert_credentials(installation_root);
        alert::send_alert(
            log_file,
            &token,
            &chat_id,
            &format!("\u{26a0}\u{fe0f} Claudio server is down after {} restart attempts. Please check the server manually.", install.health_max_restarts),
        )
        .await;
    }
}
