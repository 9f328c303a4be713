//! WhatsApp Cloud API webhook JSON → `ParsedMessage`.
//!
//! WhatsApp has no numeric update id the way Telegram does; the dedup set
//! needs an `i64`, so we derive one deterministically from the message's
//! `wamid`. Reply context isn't resolved here — WhatsApp's `context.id`
//! only names the replied-to message id, and resolving it to its text would
//! need a separate Graph API round trip we don't make on the hot path.

use claudio_core::{MediaRef, MessageKind, ParsedMessage, Platform};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn synthetic_update_id(wamid: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    wamid.hash(&mut hasher);
    (hasher.finish() >> 1) as i64
}

pub fn parse(body: &Value) -> Option<ParsedMessage> {
    let message = body["entry"][0]["changes"][0]["value"]["messages"][0].as_object()?;

    let wamid = message.get("id").and_then(Value::as_str)?;
    let from = message.get("from").and_then(Value::as_str)?.to_string();
    let msg_type = message.get("type").and_then(Value::as_str).unwrap_or("unsupported");

    let text = (msg_type == "text")
        .then(|| message["text"]["body"].as_str())
        .flatten()
        .map(str::to_string);

    let caption = message.get(msg_type).and_then(|m| m["caption"].as_str()).map(str::to_string);

    let media = |key: &str| -> Option<MediaRef> {
        message.get(key).and_then(Value::as_object).map(|m| MediaRef {
            file_id: m.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            mime_type: m.get("mime_type").and_then(Value::as_str).map(str::to_string),
            file_name: m.get("filename").and_then(Value::as_str).map(str::to_string),
        })
    };

    let image = media("image");
    let document = media("document");
    let voice = media("audio");

    let kind = match msg_type {
        "text" => MessageKind::Text,
        "image" => MessageKind::Image,
        "document" => MessageKind::Document,
        "audio" => MessageKind::Voice,
        _ => MessageKind::Unsupported,
    };

    Some(ParsedMessage {
        platform: Platform::WhatsApp,
        update_id: synthetic_update_id(wamid),
        chat_id: from.clone(),
        message_id: wamid.to_string(),
        sender_id: from,
        kind,
        text,
        caption,
        image,
        extra_images: Vec::new(),
        document,
        voice,
        reply_to: None,
        media_group_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(message: Value) -> Value {
        json!({
            "entry": [{
                "changes": [{
                    "value": { "messages": [message] }
                }]
            }]
        })
    }

    #[test]
    fn parses_a_text_message() {
        let body = envelope(json!({
            "id": "wamid.ABC",
            "from": "15551234567",
            "type": "text",
            "text": {"body": "hi there"},
        }));
        let msg = parse(&body).unwrap();
        assert_eq!(msg.chat_id, "15551234567");
        assert_eq!(msg.text.as_deref(), Some("hi there"));
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn parses_an_audio_message_as_voice() {
        let body = envelope(json!({
            "id": "wamid.DEF",
            "from": "1",
            "type": "audio",
            "audio": {"id": "media-1", "mime_type": "audio/ogg"},
        }));
        let msg = parse(&body).unwrap();
        assert_eq!(msg.kind, MessageKind::Voice);
        assert_eq!(msg.voice.unwrap().file_id, "media-1");
    }

    #[test]
    fn unknown_types_are_unsupported() {
        let body = envelope(json!({"id": "wamid.X", "from": "1", "type": "sticker"}));
        let msg = parse(&body).unwrap();
        assert_eq!(msg.kind, MessageKind::Unsupported);
    }

    #[test]
    fn same_wamid_hashes_to_the_same_update_id() {
        assert_eq!(synthetic_update_id("wamid.ABC"), synthetic_update_id("wamid.ABC"));
        assert_ne!(synthetic_update_id("wamid.ABC"), synthetic_update_id("wamid.DEF"));
    }
}
