//! The message pipeline: one procedure per inbound chat message, run to
//! completion on a single per-chat worker. Every step is best-effort unless
//! noted — a failed memory lookup or a missing CLAUDE.md extension degrades
//! the turn, it never aborts it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use claudio_agent::{AgentRequest, AgentRunner};
use claudio_core::{HistoryRole, MediaRef, MessageKind, Model, ParsedMessage, Platform};
use claudio_media::provider::{SttProvider, TtsProvider};
use claudio_platform::client::PlatformClient;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::memory_client::MemoryClient;
use crate::sanitize::{descriptive_summary, reply_context_prefix, sanitize};
use crate::{history, temp_workspace};

const TYPING_INTERVAL: Duration = Duration::from_secs(4);
const HISTORY_RETRIEVAL_LINES: u32 = 20;
const MEMORY_TOP_K: usize = 5;

/// Everything a pipeline run needs that outlives any one message: platform
/// adapter, AI CLI runner, memory socket, and the bot's static configuration.
pub struct PipelineContext {
    pub bot_id: String,
    pub bot_dir: PathBuf,
    pub history_db: PathBuf,
    pub authorized_sender_id: Option<String>,
    pub platform_kind: Platform,
    pub platform: Arc<dyn PlatformClient>,
    pub stt: Option<Arc<dyn SttProvider>>,
    pub tts: Option<Arc<dyn TtsProvider>>,
    pub agent: Arc<AgentRunner>,
    pub memory: Arc<MemoryClient>,
    pub claude_md: String,
    pub model: Model,
    pub allowed_tools: Vec<String>,
    pub mcp_servers: serde_json::Value,
    pub max_history_lines: u32,
    pub tts_voice: String,
    pub tts_model: String,
}

/// Persist a model change to disk; implemented by the caller (claudio-config
/// owns `bot.env` atomicity) so this crate doesn't need write access to the
/// bot registry.
pub trait ModelPersister: Send + Sync {
    fn save_model(&self, model: Model) -> Result<()>;
}

/// Run the full pipeline for one already-parsed message. Platform-specific
/// parsing (step 1) happens upstream in the webhook dispatcher; this is
/// steps 2 through 18.
pub async fn process(ctx: &PipelineContext, msg: ParsedMessage, persister: &dyn ModelPersister) -> Result<()> {
    // Step 2: authorise. No configured sender id means fail closed.
    let authorized = match &ctx.authorized_sender_id {
        Some(sender) => *sender == msg.sender_id,
        None => false,
    };
    if !authorized {
        warn!(bot_id = %ctx.bot_id, sender = %msg.sender_id, "rejecting message from unauthorised sender");
        return Ok(());
    }

    // Step 3: WhatsApp media-type gate.
    if ctx.platform_kind == Platform::WhatsApp && matches!(msg.kind, MessageKind::Unsupported) {
        ctx.platform.send_message(&msg.chat_id, "Sorry, I can't handle that kind of message yet.", None).await;
        return Ok(());
    }

    // Step 4: early exit on genuinely empty messages.
    if msg.is_empty() {
        debug!(bot_id = %ctx.bot_id, "empty message, nothing to do");
        return Ok(());
    }

    // Step 5: slash commands, dispatched before reply-context injection.
    if let Some(text) = msg.text.as_deref() {
        if let Some(handled) = handle_command(ctx, &msg.chat_id, text, persister).await {
            return handled;
        }
    }

    // Step 6: reply-context injection.
    let mut user_text = msg.text.clone().or_else(|| msg.caption.clone()).unwrap_or_default();
    if let Some(reply) = &msg.reply_to {
        let prefix = reply_context_prefix(&reply.replied_to_name, &reply.quoted_text);
        user_text = format!("{prefix} {user_text}").trim().to_string();
    }

    // Step 7: acknowledgement, fire-and-forget.
    acknowledge(ctx, &msg).await;

    // Step 8: temp workspace for this message.
    let workspace = temp_workspace::TempWorkspace::create()?;

    // Step 9: media downloads.
    let mut downloaded: Vec<(&'static str, PathBuf)> = Vec::new();
    if let Err(reply) = download_all(ctx, &msg, &workspace, &mut downloaded).await {
        ctx.platform.send_message(&msg.chat_id, &reply, msg.reply_to.as_ref().map(|_| msg.message_id.as_str())).await;
        return Ok(());
    }

    // Step 10: voice transcription.
    let mut transcribed_voice = false;
    if let Some((_, voice_path)) = downloaded.iter().find(|(kind, _)| *kind == "voice") {
        if let Some(stt) = &ctx.stt {
            match transcribe(stt.as_ref(), voice_path).await {
                Ok(transcript) => {
                    user_text = if user_text.is_empty() { transcript } else { format!("{transcript} {user_text}") };
                    transcribed_voice = true;
                }
                Err(err) => warn!(bot_id = %ctx.bot_id, error = %err, "voice transcription failed, continuing with empty text"),
            }
        }
    }

    // Step 11: prompt assembly + descriptive placeholder for history.
    let mut ai_prompt = user_text.clone();
    let mut history_placeholder = user_text.clone();
    for (kind, path) in &downloaded {
        if *kind == "voice" {
            continue;
        }
        ai_prompt.push_str(&format!("\n[The user sent a{} at {}]", article_for(kind), path.display()));
        if history_placeholder.is_empty() {
            let caption = msg.caption.as_deref().unwrap_or("");
            history_placeholder = format!("[Sent a{} with caption: {}]", article_for(kind), sanitize(caption));
        }
    }

    // Step 12: typing indicator (Telegram only), cancelled in step 18.
    let typing_ticker = if ctx.platform_kind == Platform::Telegram {
        Some(spawn_typing_ticker(ctx.platform.clone(), msg.chat_id.clone()))
    } else {
        None
    };

    // Step 13: history + memory retrieval, best-effort.
    let history_conn = history::open(&ctx.history_db).ok();
    let history_rows = history_conn
        .as_ref()
        .and_then(|conn| history::recent(conn, HISTORY_RETRIEVAL_LINES.min(ctx.max_history_lines)).ok())
        .unwrap_or_default();
    let memory_block = ctx.memory.retrieve(&ctx.bot_id, &user_text, MEMORY_TOP_K).await;

    let mut full_prompt = String::new();
    if !history_rows.is_empty() {
        full_prompt.push_str("[Previous conversation]\n");
        for row in &history_rows {
            full_prompt.push_str(&format!("{}: {}\n", row.role, sanitize(&row.content)));
        }
        full_prompt.push('\n');
    }
    if let Some(block) = &memory_block {
        full_prompt.push_str("[Relevant memories]\n");
        full_prompt.push_str(block);
        full_prompt.push('\n');
    }
    full_prompt.push_str("[Current message]\n");
    full_prompt.push_str(&ai_prompt);

    // Step 14: AI invocation.
    let agent_request = AgentRequest {
        model: ctx.model,
        system_prompt_extra: ctx.claude_md.clone(),
        prompt: full_prompt,
        allowed_tools: ctx.allowed_tools.clone(),
        mcp_servers: ctx.mcp_servers.clone(),
    };
    let agent_result = ctx.agent.run(&agent_request).await;

    if let Some(ticker) = typing_ticker {
        ticker.abort();
    }

    let response = match agent_result {
        Ok(response) => response,
        Err(err) => {
            warn!(bot_id = %ctx.bot_id, error = %err, "AI invocation failed");
            ctx.platform.send_message(&msg.chat_id, "Sorry, something went wrong processing that.", None).await;
            workspace.cleanup();
            return Ok(());
        }
    };

    // Step 14b: token usage persistence, fire-and-forget.
    if let Some(usage) = response.usage.clone() {
        let db_path = ctx.history_db.clone();
        tokio::spawn(async move {
            claudio_agent::token_usage::persist_best_effort(db_path, usage).await;
        });
    }

    // Step 15: history record.
    let mut user_row_id = None;
    if let Some(conn) = &history_conn {
        user_row_id = history::append(conn, HistoryRole::User, &history_placeholder).ok();
        let mut assistant_text = String::new();
        for notification in &response.notifications {
            assistant_text.push_str(notification);
            assistant_text.push('\n');
        }
        assistant_text.push_str(&sanitize(&response.reply));
        history::append(conn, HistoryRole::Assistant, &assistant_text).ok();

        if downloaded.iter().any(|(kind, _)| *kind == "document") && msg.caption.is_none() {
            if let Some(id) = user_row_id {
                let summary = descriptive_summary(&response.reply);
                history::overwrite(conn, id, &format!("[Sent a document, reply: {summary}]")).ok();
            }
        }
    }

    // Step 16: memory consolidation, fire-and-forget.
    {
        let memory = ctx.memory.clone();
        let bot_id = ctx.bot_id.clone();
        let turns = vec![("user".to_string(), history_placeholder.clone()), ("assistant".to_string(), response.reply.clone())];
        tokio::spawn(async move {
            memory.consolidate(&bot_id, &turns).await;
        });
    }

    // Step 17: deliver.
    deliver(ctx, &msg, &response.reply, transcribed_voice, &workspace).await;

    // Step 18: cleanup.
    workspace.cleanup();

    Ok(())
}

async fn handle_command(
    ctx: &PipelineContext,
    chat_id: &str,
    text: &str,
    persister: &dyn ModelPersister,
) -> Option<Result<()>> {
    let trimmed = text.trim();
    let model = match trimmed {
        "/opus" => Some(Model::Opus),
        "/sonnet" => Some(Model::Sonnet),
        "/haiku" => Some(Model::Haiku),
        _ => None,
    };
    if let Some(model) = model {
        if let Err(err) = persister.save_model(model) {
            warn!(bot_id = %ctx.bot_id, error = %err, "failed to persist model change");
        }
        ctx.platform.send_message(chat_id, &format!("Switched to {model}."), None).await;
        return Some(Ok(()));
    }
    if trimmed == "/start" {
        ctx.platform.send_message(chat_id, "Hi! I'm ready whenever you are.", None).await;
        return Some(Ok(()));
    }
    None
}

async fn acknowledge(ctx: &PipelineContext, msg: &ParsedMessage) {
    match ctx.platform_kind {
        Platform::Telegram => ctx.platform.set_reaction(&msg.chat_id, &msg.message_id, "\u{1F440}").await,
        Platform::WhatsApp => ctx.platform.mark_read(&msg.chat_id, &msg.message_id).await,
        Platform::Alexa => {}
    }
}

async fn download_all(
    ctx: &PipelineContext,
    msg: &ParsedMessage,
    workspace: &temp_workspace::TempWorkspace,
    downloaded: &mut Vec<(&'static str, PathBuf)>,
) -> std::result::Result<(), String> {
    if let Some(image) = &msg.image {
        download_one(ctx, image, workspace, "image", downloaded).await?;
    }
    if let Some(document) = &msg.document {
        download_one(ctx, document, workspace, "document", downloaded).await?;
    }
    if let Some(voice) = &msg.voice {
        download_one(ctx, voice, workspace, "voice", downloaded).await?;
    }
    Ok(())
}

async fn download_one(
    ctx: &PipelineContext,
    media: &MediaRef,
    workspace: &temp_workspace::TempWorkspace,
    kind: &'static str,
    downloaded: &mut Vec<(&'static str, PathBuf)>,
) -> std::result::Result<(), String> {
    let output_path = workspace.path().join(format!("{kind}-{}", media.file_id));
    let validator: Option<claudio_platform::client::Validator> = match kind {
        "image" => Some(claudio_platform::magic::is_image),
        "voice" => Some(claudio_platform::magic::is_audio),
        _ => None,
    };
    match ctx.platform.download_file(&media.file_id, &output_path, validator).await {
        Ok(true) => {
            downloaded.push((kind, output_path));
            Ok(())
        }
        Ok(false) => Err("Sorry, I couldn't download that file.".to_string()),
        Err(err) => {
            warn!(bot_id = %ctx.bot_id, error = %err, kind, "media download failed");
            Err("Sorry, I couldn't download that file.".to_string())
        }
    }
}

async fn transcribe(stt: &dyn SttProvider, path: &Path) -> claudio_media::Result<String> {
    let bytes = tokio::fs::read(path).await.map_err(claudio_media::MediaError::Io)?;
    let format = path.extension().and_then(|e| e.to_str()).unwrap_or("ogg");
    claudio_media::provider::validate_stt_input(&bytes, format)?;
    stt.transcribe(&bytes, format).await
}

fn spawn_typing_ticker(platform: Arc<dyn PlatformClient>, chat_id: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            platform.send_typing(&chat_id).await;
            tokio::time::sleep(TYPING_INTERVAL).await;
        }
    })
}

async fn deliver(ctx: &PipelineContext, msg: &ParsedMessage, reply: &str, as_voice: bool, workspace: &temp_workspace::TempWorkspace) {
    if as_voice {
        if let Some(tts) = &ctx.tts {
            let voice_path = workspace.path().join("reply.ogg");
            let (text, _truncated) = claudio_media::provider::truncate_for_tts(reply);
            match claudio_media::tts::synthesize_to_file(tts.as_ref(), &text, &ctx.tts_voice, &ctx.tts_model, &voice_path).await {
                Ok(()) => {
                    if ctx.platform.send_voice(&msg.chat_id, &voice_path, None).await {
                        return;
                    }
                }
                Err(err) => warn!(bot_id = %ctx.bot_id, error = %err, "TTS synthesis failed, falling back to text"),
            }
        }
    }
    ctx.platform.send_message(&msg.chat_id, reply, None).await;
}

fn article_for(kind: &str) -> &'static str {
    match kind {
        "image" => "n image",
        _ => " document",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_for_picks_an_vs_a() {
        assert_eq!(article_for("image"), "n image");
        assert_eq!(article_for("document"), " document");
    }
}
