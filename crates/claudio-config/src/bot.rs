use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use claudio_core::Model;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::env_file;
use crate::error::{ConfigError, Result};

fn bot_id_re() -> Regex {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("static regex")
}

/// Rejects anything that isn't a plain, single-component directory name:
/// no path separators, no `..`, no leading dot.
pub fn validate_bot_id(bot_id: &str) -> Result<()> {
    if bot_id_re().is_match(bot_id) && !bot_id.contains("..") {
        Ok(())
    } else {
        Err(ConfigError::InvalidBotId(bot_id.to_string()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppCredentials {
    pub phone_number_id: String,
    pub access_token: String,
    pub app_secret: String,
    pub verify_token: String,
    pub phone_number: String,
}

/// An addressable tenant: owns zero-or-more platform credential sets, a
/// history database path, a prompt extension file, and a model choice.
#[derive(Debug, Clone)]
pub struct Bot {
    pub bot_id: String,
    pub bot_dir: PathBuf,
    pub telegram: Option<TelegramCredentials>,
    pub whatsapp: Option<WhatsAppCredentials>,
    pub model: Model,
    pub max_history_lines: u32,
    pub db_file: PathBuf,
}

impl Bot {
    /// Path to this bot's `CLAUDE.md` prompt extension, read lazily by the
    /// agent runner — absence is not an error, just an empty extension.
    pub fn claude_md_path(&self) -> PathBuf {
        self.bot_dir.join("CLAUDE.md")
    }

    pub fn claude_md(&self) -> String {
        fs::read_to_string(self.claude_md_path()).unwrap_or_default()
    }

    /// Build a `Bot` by reading `bot_dir/bot.env`. `bot_id` is validated
    /// before any filesystem access.
    pub fn load(bot_id: &str, bot_dir: PathBuf) -> Result<Self> {
        validate_bot_id(bot_id)?;
        let env = env_file::parse(&bot_dir.join("bot.env"));

        let telegram_token = env.get("TELEGRAM_BOT_TOKEN").cloned().unwrap_or_default();
        let telegram = if telegram_token.is_empty() {
            None
        } else {
            Some(TelegramCredentials {
                bot_token: telegram_token,
                chat_id: env.get("TELEGRAM_CHAT_ID").cloned().unwrap_or_default(),
                webhook_secret: env.get("WEBHOOK_SECRET").cloned().unwrap_or_default(),
            })
        };

        let whatsapp_phone_id = env
            .get("WHATSAPP_PHONE_NUMBER_ID")
            .cloned()
            .unwrap_or_default();
        let whatsapp = if whatsapp_phone_id.is_empty() {
            None
        } else {
            Some(WhatsAppCredentials {
                phone_number_id: whatsapp_phone_id,
                access_token: env.get("WHATSAPP_ACCESS_TOKEN").cloned().unwrap_or_default(),
                app_secret: env.get("WHATSAPP_APP_SECRET").cloned().unwrap_or_default(),
                verify_token: env.get("WHATSAPP_VERIFY_TOKEN").cloned().unwrap_or_default(),
                phone_number: env.get("WHATSAPP_PHONE_NUMBER").cloned().unwrap_or_default(),
            })
        };

        let model = env
            .get("MODEL")
            .map(|s| s.as_str())
            .unwrap_or("haiku")
            .parse()
            .unwrap_or(Model::Haiku);

        let max_history_lines: u32 = env
            .get("MAX_HISTORY_LINES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);

        Ok(Bot {
            bot_id: bot_id.to_string(),
            db_file: bot_dir.join("history.db"),
            bot_dir,
            telegram,
            whatsapp,
            model,
            max_history_lines,
        })
    }

    /// Persist credential fields to `bot_dir/bot.env` (0700 dir, 0600 file).
    pub fn save_env(&self, extra: &BTreeMap<String, String>) -> Result<()> {
        let mut fields = extra.clone();
        if let Some(tg) = &self.telegram {
            fields.insert("TELEGRAM_BOT_TOKEN".into(), tg.bot_token.clone());
            fields.insert("TELEGRAM_CHAT_ID".into(), tg.chat_id.clone());
            fields.insert("WEBHOOK_SECRET".into(), tg.webhook_secret.clone());
        }
        if let Some(wa) = &self.whatsapp {
            fields.insert("WHATSAPP_PHONE_NUMBER_ID".into(), wa.phone_number_id.clone());
            fields.insert("WHATSAPP_ACCESS_TOKEN".into(), wa.access_token.clone());
            fields.insert("WHATSAPP_APP_SECRET".into(), wa.app_secret.clone());
            fields.insert("WHATSAPP_VERIFY_TOKEN".into(), wa.verify_token.clone());
            fields.insert("WHATSAPP_PHONE_NUMBER".into(), wa.phone_number.clone());
        }
        fields.insert("MODEL".into(), self.model.to_string());
        fields.insert("MAX_HISTORY_LINES".into(), self.max_history_lines.to_string());
        env_file::save_bot_env(&self.bot_dir, &fields)
    }

    pub fn save_model(&mut self, model: Model) -> Result<()> {
        env_file::save_model(&self.bot_dir, &model.to_string())?;
        self.model = model;
        Ok(())
    }
}

/// Scan `installation_root/bots/*/bot.env` and load each one. A directory
/// entry without a `bot.env` is not a bot and is skipped silently (it may be
/// scratch space or a bot mid-setup).
pub fn discover_bots(installation_root: &Path) -> Result<Vec<Bot>> {
    let bots_dir = installation_root.join("bots");
    let mut names = Vec::new();
    if let Ok(entries) = fs::read_dir(&bots_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path.join("bot.env").is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
    }
    names.sort();

    let mut bots = Vec::with_capacity(names.len());
    for name in names {
        bots.push(Bot::load(&name, bots_dir.join(&name))?);
    }
    Ok(bots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn validate_bot_id_rejects_path_traversal() {
        assert!(validate_bot_id("../etc").is_err());
        assert!(validate_bot_id("a/b").is_err());
        assert!(validate_bot_id("-leading-dash").is_err());
    }

    #[test]
    fn validate_bot_id_accepts_normal_ids() {
        assert!(validate_bot_id("my-bot_01").is_ok());
    }

    #[test]
    fn discover_bots_skips_directories_without_bot_env() {
        let dir = tempdir().unwrap();
        let bots_dir = dir.path().join("bots");
        fs::create_dir_all(bots_dir.join("valid")).unwrap();
        fs::write(bots_dir.join("valid/bot.env"), "TELEGRAM_BOT_TOKEN=\"t\"\n").unwrap();
        fs::create_dir_all(bots_dir.join("scratch")).unwrap();

        let bots = discover_bots(dir.path()).unwrap();
        assert_eq!(bots.len(), 1);
        assert_eq!(bots[0].bot_id, "valid");
    }

    #[test]
    fn load_defaults_model_to_haiku() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(&dir).unwrap();
        let bot = Bot::load("b1", dir.path().to_path_buf()).unwrap();
        assert!(matches!(bot.model, Model::Haiku));
    }
}
