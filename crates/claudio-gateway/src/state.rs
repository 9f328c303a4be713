use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use claudio_agent::AgentRunner;
use claudio_config::{BotRegistry, InstallationConfig};
use claudio_pipeline::MemoryClient;
use tracing::warn;

use crate::alexa_session::AlexaSessions;
use crate::alexa_verify::AlexaVerifier;
use crate::bot_context::BuiltBot;
use crate::dispatch::Dispatcher;
use crate::media_group::MediaGroupCoalescer;

/// Everything a handler needs. Cloned per-request (cheap: every field is an
/// `Arc` or small value).
#[derive(Clone)]
pub struct GatewayState {
    pub install: Arc<InstallationConfig>,
    pub registry: Arc<BotRegistry>,
    pub bots: Arc<RwLock<HashMap<String, Arc<BuiltBot>>>>,
    pub agent: Arc<AgentRunner>,
    pub memory: Arc<MemoryClient>,
    pub dispatcher: Dispatcher,
    pub media_groups: MediaGroupCoalescer,
    pub alexa_sessions: Arc<AlexaSessions>,
    pub alexa_verifier: Arc<AlexaVerifier>,
}

impl GatewayState {
    pub fn bot_by_id(&self, bot_id: &str) -> Option<Arc<BuiltBot>> {
        self.bots.read().unwrap().get(bot_id).cloned()
    }

    /// Used by the WhatsApp handler, which has no per-request bot id and
    /// must try every WhatsApp-configured bot's app secret.
    pub fn whatsapp_bots(&self) -> Vec<Arc<BuiltBot>> {
        self.bots
            .read()
            .unwrap()
            .values()
            .filter(|b| b.whatsapp_app_secret.is_some())
            .cloned()
            .collect()
    }

    /// Any bot with Telegram credentials, used to host the Alexa voice
    /// frontend — Alexa has no bot-selection mechanism of its own, so it
    /// always targets the first Telegram-capable bot found.
    pub fn alexa_target_bot(&self) -> Option<Arc<BuiltBot>> {
        self.bots
            .read()
            .unwrap()
            .values()
            .find(|b| b.telegram_chat_id.is_some())
            .cloned()
    }

    /// Rescan the bots directory, rebuild the registry, and rebuild every
    /// bot's `PipelineContext` from scratch. Invoked on SIGHUP or `/reload`.
    pub fn rebuild_bots(&self) -> claudio_config::Result<()> {
        self.registry.reload()?;

        let mut fresh = HashMap::new();
        for bot in self.registry.all() {
            let bot_id = bot.bot_id.clone();
            match crate::bot_context::build(&bot, &self.install, self.agent.clone(), self.memory.clone()) {
                Ok(built) => {
                    fresh.insert(bot_id, Arc::new(built));
                }
                Err(err) => warn!(bot_id, error = %err, "failed to build pipeline context for bot"),
            }
        }

        *self.bots.write().unwrap() = fresh;
        Ok(())
    }
}
