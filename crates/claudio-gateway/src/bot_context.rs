//! Builds a `PipelineContext` (and its `ModelPersister`) for one bot out of
//! its `claudio_config::Bot` record plus the process-wide installation
//! config and shared adapters (agent runner, memory client).

use std::sync::Arc;

use claudio_config::{Bot, ConfigError};
use claudio_config::InstallationConfig;
use claudio_media::{ElevenLabsProvider, ElevenLabsTts};
use claudio_pipeline::{ModelPersister, PipelineContext};
use claudio_platform::{telegram::TelegramClient, whatsapp::WhatsAppClient};

pub struct BotModelPersister {
    bot_dir: std::path::PathBuf,
}

impl ModelPersister for BotModelPersister {
    fn save_model(&self, model: claudio_core::Model) -> claudio_pipeline::Result<()> {
        claudio_config::env_file::save_model(&self.bot_dir, &model.to_string())
            .map_err(claudio_pipeline::PipelineError::from)
    }
}

/// Everything needed to run the pipeline for one Telegram- or
/// WhatsApp-backed bot. Built once per bot at startup/reload.
pub struct BuiltBot {
    pub bot_id: String,
    pub telegram_secret: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub whatsapp_app_secret: Option<String>,
    pub ctx: PipelineContext,
    pub persister: BotModelPersister,
}

pub fn build(bot: &Bot, install: &InstallationConfig, agent: Arc<claudio_agent::AgentRunner>, memory: Arc<claudio_pipeline::MemoryClient>) -> Result<BuiltBot, ConfigError> {
    let (platform, platform_kind, authorized_sender_id, telegram_secret, telegram_chat_id) = if let Some(tg) = &bot.telegram {
        let client: Arc<dyn claudio_platform::client::PlatformClient> = Arc::new(TelegramClient::new(tg.bot_token.clone()));
        (
            client,
            claudio_core::Platform::Telegram,
            Some(tg.chat_id.clone()),
            Some(tg.webhook_secret.clone()),
            Some(tg.chat_id.clone()),
        )
    } else if let Some(wa) = &bot.whatsapp {
        let client: Arc<dyn claudio_platform::client::PlatformClient> =
            Arc::new(WhatsAppClient::new(wa.phone_number_id.clone(), wa.access_token.clone()));
        (client, claudio_core::Platform::WhatsApp, Some(wa.phone_number.clone()), None, None)
    } else {
        return Err(ConfigError::BotNotFound(bot.bot_id.clone()));
    };

    let whatsapp_app_secret = bot.whatsapp.as_ref().map(|wa| wa.app_secret.clone());

    let (stt, tts): (Option<Arc<dyn claudio_media::SttProvider>>, Option<Arc<dyn claudio_media::TtsProvider>>) =
        if install.elevenlabs_api_key.is_empty() {
            (None, None)
        } else {
            let stt_provider = Arc::new(ElevenLabsProvider::new(
                install.elevenlabs_api_key.clone(),
                install.elevenlabs_stt_model.clone(),
            ));
            let tts_provider = Arc::new(ElevenLabsTts::new(install.elevenlabs_api_key.clone()));
            (Some(stt_provider), Some(tts_provider))
        };

    let ctx = PipelineContext {
        bot_id: bot.bot_id.clone(),
        bot_dir: bot.bot_dir.clone(),
        history_db: bot.db_file.clone(),
        authorized_sender_id,
        platform_kind,
        platform,
        stt,
        tts,
        agent,
        memory,
        claude_md: bot.claude_md(),
        model: bot.model,
        allowed_tools: vec!["Read".to_string(), "Bash".to_string(), "WebSearch".to_string()],
        mcp_servers: serde_json::json!({}),
        max_history_lines: bot.max_history_lines,
        tts_voice: install.elevenlabs_voice_id.clone(),
        tts_model: install.elevenlabs_model.clone(),
    };

    Ok(BuiltBot {
        bot_id: bot.bot_id.clone(),
        telegram_secret,
        telegram_chat_id,
        whatsapp_app_secret,
        ctx,
        persister: BotModelPersister { bot_dir: bot.bot_dir.clone() },
    })
}
