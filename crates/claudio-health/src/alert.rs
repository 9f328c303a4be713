//! Out-of-band alerting: sends straight to the Telegram Bot API rather than
//! through the gateway, so an alert can still go out when the gateway itself
//! is the thing that's down.

use std::path::Path;

use claudio_core::filelog;
use claudio_platform::{PlatformClient, TelegramClient};

const COMPONENT: &str = "health-check";

pub async fn send_alert(log_file: &Path, bot_token: &str, chat_id: &str, text: &str) {
    if bot_token.is_empty() || chat_id.is_empty() {
        filelog::error(log_file, COMPONENT, "Cannot send alert: TELEGRAM_BOT_TOKEN or TELEGRAM_CHAT_ID not configured");
        return;
    }
    let client = TelegramClient::new(bot_token.to_string());
    if !client.send_message(chat_id, text, None).await {
        filelog::error(log_file, COMPONENT, "Failed to send Telegram alert");
    }
}
