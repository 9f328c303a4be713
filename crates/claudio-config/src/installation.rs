use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::env_file;
use crate::error::Result;

const MANAGED_KEYS: &[&str] = &[
    "PORT",
    "WEBHOOK_URL",
    "TUNNEL_NAME",
    "TUNNEL_HOSTNAME",
    "WEBHOOK_RETRY_DELAY",
    "ELEVENLABS_API_KEY",
    "ELEVENLABS_VOICE_ID",
    "ELEVENLABS_MODEL",
    "ELEVENLABS_STT_MODEL",
    "MEMORY_ENABLED",
    "MEMORY_EMBEDDING_MODEL",
    "MEMORY_CONSOLIDATION_MODEL",
    "HEALTH_MAX_RESTARTS",
    "DISK_USAGE_THRESHOLD",
    "LOG_MAX_SIZE",
    "BACKUP_MAX_AGE",
    "BACKUP_DEST",
    "LOG_CHECK_WINDOW",
    "LOG_ALERT_COOLDOWN",
];

fn defaults() -> BTreeMap<&'static str, &'static str> {
    let mut d = BTreeMap::new();
    d.insert("PORT", "8421");
    d.insert("WEBHOOK_URL", "");
    d.insert("TUNNEL_NAME", "");
    d.insert("TUNNEL_HOSTNAME", "");
    d.insert("WEBHOOK_RETRY_DELAY", "60");
    d.insert("ELEVENLABS_API_KEY", "");
    d.insert("ELEVENLABS_VOICE_ID", "iP95p4xoKVk53GoZ742B");
    d.insert("ELEVENLABS_MODEL", "eleven_multilingual_v2");
    d.insert("ELEVENLABS_STT_MODEL", "scribe_v1");
    d.insert("MEMORY_ENABLED", "1");
    d.insert("MEMORY_EMBEDDING_MODEL", "sentence-transformers/all-MiniLM-L6-v2");
    d.insert("MEMORY_CONSOLIDATION_MODEL", "haiku");
    d.insert("HEALTH_MAX_RESTARTS", "5");
    d.insert("DISK_USAGE_THRESHOLD", "90");
    d.insert("LOG_MAX_SIZE", "10485760");
    d.insert("BACKUP_MAX_AGE", "7200");
    d.insert("BACKUP_DEST", "/mnt/ssd");
    d.insert("LOG_CHECK_WINDOW", "300");
    d.insert("LOG_ALERT_COOLDOWN", "1800");
    d
}

/// Process-wide installation globals: port, webhook base URL, tunnel
/// identity, STT/TTS credentials, memory toggles, retention parameters.
/// Loaded once at start, reloadable on signal (the values themselves are
/// cheap to clone; callers swap their own `Arc<InstallationConfig>`).
#[derive(Debug, Clone)]
pub struct InstallationConfig {
    pub installation_root: PathBuf,
    pub port: u16,
    pub webhook_url: String,
    pub tunnel_name: String,
    pub tunnel_hostname: String,
    pub webhook_retry_delay_secs: u64,
    pub elevenlabs_api_key: String,
    pub elevenlabs_voice_id: String,
    pub elevenlabs_model: String,
    pub elevenlabs_stt_model: String,
    pub memory_enabled: bool,
    pub memory_embedding_model: String,
    pub memory_consolidation_model: String,
    pub health_max_restarts: u32,
    pub disk_usage_threshold_pct: u32,
    pub log_max_size_bytes: u64,
    pub backup_max_age_secs: u64,
    pub backup_dest: PathBuf,
    pub log_check_window_secs: u64,
    pub log_alert_cooldown_secs: u64,
}

impl InstallationConfig {
    fn env_path(installation_root: &Path) -> PathBuf {
        installation_root.join("service.env")
    }

    pub fn load(installation_root: PathBuf) -> Self {
        let env = env_file::parse(&Self::env_path(&installation_root));
        Self::from_env(installation_root, env)
    }

    fn from_env(installation_root: PathBuf, env: BTreeMap<String, String>) -> Self {
        let get = |key: &str, default: &str| env.get(key).cloned().unwrap_or_else(|| default.to_string());

        InstallationConfig {
            port: get("PORT", "8421").parse().unwrap_or(8421),
            webhook_url: get("WEBHOOK_URL", ""),
            tunnel_name: get("TUNNEL_NAME", ""),
            tunnel_hostname: get("TUNNEL_HOSTNAME", ""),
            webhook_retry_delay_secs: get("WEBHOOK_RETRY_DELAY", "60").parse().unwrap_or(60),
            elevenlabs_api_key: get("ELEVENLABS_API_KEY", ""),
            elevenlabs_voice_id: get("ELEVENLABS_VOICE_ID", "iP95p4xoKVk53GoZ742B"),
            elevenlabs_model: get("ELEVENLABS_MODEL", "eleven_multilingual_v2"),
            elevenlabs_stt_model: get("ELEVENLABS_STT_MODEL", "scribe_v1"),
            memory_enabled: get("MEMORY_ENABLED", "1") == "1",
            memory_embedding_model: get(
                "MEMORY_EMBEDDING_MODEL",
                "sentence-transformers/all-MiniLM-L6-v2",
            ),
            memory_consolidation_model: get("MEMORY_CONSOLIDATION_MODEL", "haiku"),
            health_max_restarts: get("HEALTH_MAX_RESTARTS", "5").parse().unwrap_or(5),
            disk_usage_threshold_pct: get("DISK_USAGE_THRESHOLD", "90").parse().unwrap_or(90),
            log_max_size_bytes: get("LOG_MAX_SIZE", "10485760").parse().unwrap_or(10_485_760),
            backup_max_age_secs: get("BACKUP_MAX_AGE", "7200").parse().unwrap_or(7200),
            backup_dest: PathBuf::from(get("BACKUP_DEST", "/mnt/ssd")),
            log_check_window_secs: get("LOG_CHECK_WINDOW", "300").parse().unwrap_or(300),
            log_alert_cooldown_secs: get("LOG_ALERT_COOLDOWN", "1800").parse().unwrap_or(1800),
            installation_root,
        }
    }

    /// Rewrite `service.env`, preserving any unmanaged keys already there.
    pub fn save(&self) -> Result<()> {
        let mut values = BTreeMap::new();
        values.insert("PORT".to_string(), self.port.to_string());
        values.insert("WEBHOOK_URL".to_string(), self.webhook_url.clone());
        values.insert("TUNNEL_NAME".to_string(), self.tunnel_name.clone());
        values.insert("TUNNEL_HOSTNAME".to_string(), self.tunnel_hostname.clone());
        values.insert(
            "WEBHOOK_RETRY_DELAY".to_string(),
            self.webhook_retry_delay_secs.to_string(),
        );
        values.insert("ELEVENLABS_API_KEY".to_string(), self.elevenlabs_api_key.clone());
        values.insert("ELEVENLABS_VOICE_ID".to_string(), self.elevenlabs_voice_id.clone());
        values.insert("ELEVENLABS_MODEL".to_string(), self.elevenlabs_model.clone());
        values.insert(
            "ELEVENLABS_STT_MODEL".to_string(),
            self.elevenlabs_stt_model.clone(),
        );
        values.insert(
            "MEMORY_ENABLED".to_string(),
            if self.memory_enabled { "1" } else { "0" }.to_string(),
        );
        values.insert(
            "MEMORY_EMBEDDING_MODEL".to_string(),
            self.memory_embedding_model.clone(),
        );
        values.insert(
            "MEMORY_CONSOLIDATION_MODEL".to_string(),
            self.memory_consolidation_model.clone(),
        );
        values.insert("HEALTH_MAX_RESTARTS".to_string(), self.health_max_restarts.to_string());
        values.insert("DISK_USAGE_THRESHOLD".to_string(), self.disk_usage_threshold_pct.to_string());
        values.insert("LOG_MAX_SIZE".to_string(), self.log_max_size_bytes.to_string());
        values.insert("BACKUP_MAX_AGE".to_string(), self.backup_max_age_secs.to_string());
        values.insert("BACKUP_DEST".to_string(), self.backup_dest.display().to_string());
        values.insert("LOG_CHECK_WINDOW".to_string(), self.log_check_window_secs.to_string());
        values.insert("LOG_ALERT_COOLDOWN".to_string(), self.log_alert_cooldown_secs.to_string());

        env_file::save_service_env(
            &Self::env_path(&self.installation_root),
            MANAGED_KEYS,
            &defaults(),
            &values,
        )
    }

    pub fn bots_dir(&self) -> PathBuf {
        self.installation_root.join("bots")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let cfg = InstallationConfig::load(dir.path().to_path_buf());
        assert_eq!(cfg.port, 8421);
        assert!(cfg.memory_enabled);
        assert_eq!(cfg.disk_usage_threshold_pct, 90);
        assert_eq!(cfg.backup_dest, PathBuf::from("/mnt/ssd"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut cfg = InstallationConfig::load(dir.path().to_path_buf());
        cfg.port = 9999;
        cfg.webhook_url = "https://example.com/hook".to_string();
        cfg.save().unwrap();

        let reloaded = InstallationConfig::load(dir.path().to_path_buf());
        assert_eq!(reloaded.port, 9999);
        assert_eq!(reloaded.webhook_url, "https://example.com/hook");
    }

    #[test]
    fn save_preserves_unmanaged_keys() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.path().join("service.env"), "HASS_TOKEN=\"xyz\"\n").unwrap();

        let cfg = InstallationConfig::load(dir.path().to_path_buf());
        cfg.save().unwrap();

        let content = fs::read_to_string(dir.path().join("service.env")).unwrap();
        assert!(content.contains("HASS_TOKEN=\"xyz\""));
    }
}
