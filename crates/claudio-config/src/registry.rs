use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use subtle::ConstantTimeEq;

use crate::bot::{discover_bots, Bot};
use crate::error::Result;

/// Bot-id → bot record, plus a reverse index from Telegram webhook secret to
/// bot-id. Rebuilt wholesale and swapped atomically behind one lock on
/// reload, mirroring a single-struct "swap the whole snapshot" registry
/// rather than per-field mutation.
pub struct BotRegistry {
    installation_root: PathBuf,
    inner: RwLock<Inner>,
}

struct Inner {
    bots: HashMap<String, Bot>,
    secret_index: HashMap<String, String>,
}

impl BotRegistry {
    pub fn load(installation_root: PathBuf) -> Result<Self> {
        let inner = Self::build(&installation_root)?;
        Ok(Self {
            installation_root,
            inner: RwLock::new(inner),
        })
    }

    fn build(installation_root: &std::path::Path) -> Result<Inner> {
        let bots = discover_bots(installation_root)?;
        let mut by_id = HashMap::with_capacity(bots.len());
        let mut secret_index = HashMap::with_capacity(bots.len());
        for bot in bots {
            if let Some(tg) = &bot.telegram {
                if !tg.webhook_secret.is_empty() {
                    secret_index.insert(tg.webhook_secret.clone(), bot.bot_id.clone());
                }
            }
            by_id.insert(bot.bot_id.clone(), bot);
        }
        Ok(Inner {
            bots: by_id,
            secret_index,
        })
    }

    /// Rescan the bots directory and swap in a fresh snapshot. Invoked from
    /// a SIGHUP handler or the `/reload` route.
    pub fn reload(&self) -> Result<()> {
        let fresh = Self::build(&self.installation_root)?;
        let mut guard = self.inner.write().expect("registry lock poisoned");
        *guard = fresh;
        Ok(())
    }

    pub fn get(&self, bot_id: &str) -> Option<Bot> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .bots
            .get(bot_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").bots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a Telegram `X-Telegram-Bot-Api-Secret-Token` header value to
    /// its owning bot using constant-time comparison against every
    /// registered secret, so lookup latency doesn't leak which prefix of a
    /// guess matched.
    pub fn find_by_secret(&self, presented_secret: &str) -> Option<Bot> {
        let guard = self.inner.read().expect("registry lock poisoned");
        let mut matched: Option<&str> = None;
        for (secret, bot_id) in &guard.secret_index {
            if bool::from(secret.as_bytes().ct_eq(presented_secret.as_bytes())) {
                matched = Some(bot_id);
            }
        }
        matched.and_then(|bot_id| guard.bots.get(bot_id).cloned())
    }

    /// Every registered bot, used by the gateway to rebuild its per-bot
    /// pipeline contexts wholesale after a reload.
    pub fn all(&self) -> Vec<Bot> {
        self.inner.read().expect("registry lock poisoned").bots.values().cloned().collect()
    }

    /// All bots with WhatsApp credentials configured — the dispatcher tries
    /// each one's app-secret against the request's HMAC signature since
    /// WhatsApp has no per-request bot identifier of its own.
    pub fn whatsapp_bots(&self) -> Vec<Bot> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .bots
            .values()
            .filter(|b| b.whatsapp.is_some())
            .cloned()
            .collect()
    }
}

impl Clone for Bot {
    fn clone(&self) -> Self {
        Bot {
            bot_id: self.bot_id.clone(),
            bot_dir: self.bot_dir.clone(),
            telegram: self.telegram.clone(),
            whatsapp: self.whatsapp.clone(),
            model: self.model,
            max_history_lines: self.max_history_lines,
            db_file: self.db_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn make_bot(root: &std::path::Path, id: &str, secret: &str) {
        let bot_dir = root.join("bots").join(id);
        fs::create_dir_all(&bot_dir).unwrap();
        fs::write(
            bot_dir.join("bot.env"),
            format!("TELEGRAM_BOT_TOKEN=\"t\"\nWEBHOOK_SECRET=\"{secret}\"\n"),
        )
        .unwrap();
    }

    #[test]
    fn find_by_secret_resolves_correct_bot() {
        let dir = tempdir().unwrap();
        make_bot(dir.path(), "bot-a", "secret-a");
        make_bot(dir.path(), "bot-b", "secret-b");

        let registry = BotRegistry::load(dir.path().to_path_buf()).unwrap();
        let found = registry.find_by_secret("secret-b").unwrap();
        assert_eq!(found.bot_id, "bot-b");
        assert!(registry.find_by_secret("nope").is_none());
    }

    #[test]
    fn reload_picks_up_new_bot() {
        let dir = tempdir().unwrap();
        make_bot(dir.path(), "bot-a", "secret-a");
        let registry = BotRegistry::load(dir.path().to_path_buf()).unwrap();
        assert_eq!(registry.len(), 1);

        make_bot(dir.path(), "bot-c", "secret-c");
        registry.reload().unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.find_by_secret("secret-c").is_some());
    }
}
