//! Telegram `Update` JSON → `ParsedMessage`. Only the `message` update kind
//! is handled; everything else (edited messages, channel posts, callback
//! queries) is out of scope and yields `None`.

use claudio_core::{MediaRef, MessageKind, ParsedMessage, Platform, ReplyContext};
use serde_json::Value;

pub fn parse(body: &Value) -> Option<ParsedMessage> {
    let update_id = body["update_id"].as_i64()?;
    let message = body.get("message")?;

    let chat_id = message["chat"]["id"].as_i64()?.to_string();
    let message_id = message["message_id"].as_i64()?.to_string();
    let sender_id = message["from"]["id"].as_i64()?.to_string();

    let text = message["text"].as_str().map(str::to_string);
    let caption = message["caption"].as_str().map(str::to_string);

    let image = message["photo"]
        .as_array()
        .and_then(|sizes| sizes.last())
        .and_then(|largest| largest["file_id"].as_str())
        .map(|file_id| MediaRef {
            file_id: file_id.to_string(),
            mime_type: Some("image/jpeg".to_string()),
            file_name: None,
        });

    let document = message["document"].as_object().map(|doc| MediaRef {
        file_id: doc["file_id"].as_str().unwrap_or_default().to_string(),
        mime_type: doc.get("mime_type").and_then(Value::as_str).map(str::to_string),
        file_name: doc.get("file_name").and_then(Value::as_str).map(str::to_string),
    });

    let voice = message["voice"].as_object().map(|v| MediaRef {
        file_id: v["file_id"].as_str().unwrap_or_default().to_string(),
        mime_type: v.get("mime_type").and_then(Value::as_str).map(str::to_string),
        file_name: None,
    });

    let reply_to = message.get("reply_to_message").and_then(|reply| {
        let quoted_text = reply["text"].as_str().or_else(|| reply["caption"].as_str())?;
        let name = reply["from"]["first_name"].as_str().unwrap_or("someone");
        Some(ReplyContext {
            replied_to_name: name.to_string(),
            quoted_text: quoted_text.to_string(),
        })
    });

    let media_group_id = message["media_group_id"].as_str().map(str::to_string);

    let kind = if image.is_some() {
        MessageKind::Image
    } else if document.is_some() {
        MessageKind::Document
    } else if voice.is_some() {
        MessageKind::Voice
    } else if text.is_some() {
        MessageKind::Text
    } else {
        MessageKind::Unsupported
    };

    Some(ParsedMessage {
        platform: Platform::Telegram,
        update_id,
        chat_id,
        message_id,
        sender_id,
        kind,
        text,
        caption,
        image,
        extra_images: Vec::new(),
        document,
        voice,
        reply_to,
        media_group_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_plain_text_message() {
        let body = json!({
            "update_id": 42,
            "message": {
                "message_id": 7,
                "chat": {"id": 100},
                "from": {"id": 200},
                "text": "hello there",
            }
        });
        let msg = parse(&body).unwrap();
        assert_eq!(msg.update_id, 42);
        assert_eq!(msg.chat_id, "100");
        assert_eq!(msg.text.as_deref(), Some("hello there"));
        assert_eq!(msg.kind, MessageKind::Text);
    }

    #[test]
    fn parses_a_reply_with_quoted_context() {
        let body = json!({
            "update_id": 1,
            "message": {
                "message_id": 2,
                "chat": {"id": 1},
                "from": {"id": 2},
                "text": "yes",
                "reply_to_message": {
                    "message_id": 1,
                    "from": {"first_name": "Alice"},
                    "text": "are you there?",
                }
            }
        });
        let msg = parse(&body).unwrap();
        let reply = msg.reply_to.unwrap();
        assert_eq!(reply.replied_to_name, "Alice");
        assert_eq!(reply.quoted_text, "are you there?");
    }

    #[test]
    fn picks_the_largest_photo_size() {
        let body = json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "chat": {"id": 1},
                "from": {"id": 1},
                "photo": [{"file_id": "small"}, {"file_id": "large"}],
            }
        });
        let msg = parse(&body).unwrap();
        assert_eq!(msg.image.unwrap().file_id, "large");
    }

    #[test]
    fn non_message_updates_are_ignored() {
        let body = json!({"update_id": 1, "callback_query": {}});
        assert!(parse(&body).is_none());
    }
}
