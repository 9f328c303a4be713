//! Alexa session buffering and response-envelope construction.
//!
//! Alexa skills get one request/response round trip per utterance and must
//! answer within a few seconds — far too tight for a full pipeline run
//! (which may legitimately take minutes). So an Alexa session just collects
//! dictated utterances locally; when the user says "stop" (or the session
//! otherwise ends) the buffered text is folded into one synthetic message
//! and handed to the same per-chat queue Telegram uses. The actual AI reply
//! lands back in the bot's Telegram chat, not read aloud by the Echo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use claudio_core::{MessageKind, ParsedMessage, Platform};
use serde_json::{json, Value};

const SESSION_TTL: Duration = Duration::from_secs(5 * 60);
/// Arbitrary offset chosen to keep synthetic update ids out of the range any
/// real Telegram `update_id` would plausibly occupy.
const SYNTHETIC_UPDATE_ID_BASE: i64 = 900_000_000;

struct SessionEntry {
    utterances: Vec<String>,
    #[allow(dead_code)]
    locale: String,
    last_activity: Instant,
}

pub struct AlexaSessions {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    next_update_id: AtomicI64,
}

pub enum AlexaOutcome {
    /// Reply to Alexa now; nothing dispatched to the pipeline.
    Respond(Value),
    /// Reply to Alexa now, and additionally dispatch this synthesized
    /// message to the bot's usual message queue.
    RespondAndDispatch(Value, ParsedMessage),
}

impl AlexaSessions {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_update_id: AtomicI64::new(SYNTHETIC_UPDATE_ID_BASE),
        }
    }

    fn evict_expired(&self, sessions: &mut HashMap<String, SessionEntry>) {
        sessions.retain(|_, entry| entry.last_activity.elapsed() < SESSION_TTL);
    }

    /// Handle one Alexa request body, given the bot's Telegram chat id and
    /// authorized sender id (the synthesized message is addressed to that
    /// chat so the existing per-chat pipeline and history apply).
    pub fn handle(&self, body: &Value, telegram_chat_id: &str, authorized_sender_id: &str) -> AlexaOutcome {
        let request = &body["request"];
        let request_type = request["type"].as_str().unwrap_or("");
        let session_id = body["session"]["sessionId"].as_str().unwrap_or("unknown").to_string();
        let locale = request["locale"].as_str().unwrap_or("en-US").to_string();

        let mut sessions = self.sessions.lock().unwrap();
        self.evict_expired(&mut sessions);

        match request_type {
            "IntentRequest" => {
                let intent_name = request["intent"]["name"].as_str().unwrap_or("");
                if intent_name == "SendMessageIntent" {
                    let utterance = request["intent"]["slots"]["utterance"]["value"]
                        .as_str()
                        .unwrap_or("")
                        .to_string();
                    let entry = sessions.entry(session_id).or_insert_with(|| SessionEntry {
                        utterances: Vec::new(),
                        locale: locale.clone(),
                        last_activity: Instant::now(),
                    });
                    if !utterance.is_empty() {
                        entry.utterances.push(utterance);
                    }
                    entry.last_activity = Instant::now();
                    AlexaOutcome::Respond(envelope(false, "Got it. Anything else?", Some("I'm listening.")))
                } else if intent_name == "AMAZON.CancelIntent" || intent_name == "AMAZON.StopIntent" {
                    let flushed = sessions.remove(&session_id);
                    drop(sessions);
                    self.flush(flushed, telegram_chat_id, authorized_sender_id)
                } else {
                    AlexaOutcome::Respond(envelope(true, "Sorry, I didn't understand that.", None))
                }
            }
            "SessionEndedRequest" => {
                let flushed = sessions.remove(&session_id);
                drop(sessions);
                self.flush(flushed, telegram_chat_id, authorized_sender_id)
            }
            _ => AlexaOutcome::Respond(envelope(true, "Hi! Tell me what to send.", None)),
        }
    }

    fn flush(&self, entry: Option<SessionEntry>, telegram_chat_id: &str, authorized_sender_id: &str) -> AlexaOutcome {
        let response = envelope(true, "Got it, I'll get back to you on Telegram.", None);
        let Some(entry) = entry else {
            return AlexaOutcome::Respond(response);
        };
        if entry.utterances.is_empty() {
            return AlexaOutcome::Respond(response);
        }

        let text = entry.utterances.join(". ");
        let update_id = self.next_update_id.fetch_add(1, Ordering::SeqCst);
        let msg = ParsedMessage {
            platform: Platform::Telegram,
            update_id,
            chat_id: telegram_chat_id.to_string(),
            message_id: format!("alexa-{update_id}"),
            sender_id: authorized_sender_id.to_string(),
            kind: MessageKind::Text,
            text: Some(text),
            caption: None,
            image: None,
            extra_images: Vec::new(),
            document: None,
            voice: None,
            reply_to: None,
            media_group_id: None,
        };
        AlexaOutcome::RespondAndDispatch(response, msg)
    }
}

fn envelope(should_end_session: bool, speech: &str, reprompt: Option<&str>) -> Value {
    let mut response = json!({
        "shouldEndSession": should_end_session,
        "outputSpeech": {"type": "PlainText", "text": speech},
    });
    if let Some(reprompt_text) = reprompt {
        response["reprompt"] = json!({"outputSpeech": {"type": "PlainText", "text": reprompt_text}});
    }
    json!({"version": "1.0", "response": response})
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intent_request(session_id: &str, intent: &str, utterance: Option<&str>) -> Value {
        let mut intent_obj = json!({"name": intent});
        if let Some(u) = utterance {
            intent_obj["slots"] = json!({"utterance": {"value": u}});
        }
        json!({
            "session": {"sessionId": session_id},
            "request": {"type": "IntentRequest", "locale": "en-US", "intent": intent_obj},
        })
    }

    #[test]
    fn send_message_intent_buffers_without_dispatching() {
        let sessions = AlexaSessions::new();
        let outcome = sessions.handle(&intent_request("s1", "SendMessageIntent", Some("remind me to call mom")), "chat1", "chat1");
        assert!(matches!(outcome, AlexaOutcome::Respond(_)));
    }

    #[test]
    fn stop_intent_flushes_buffered_utterances_as_one_message() {
        let sessions = AlexaSessions::new();
        sessions.handle(&intent_request("s1", "SendMessageIntent", Some("first part")), "chat1", "chat1");
        sessions.handle(&intent_request("s1", "SendMessageIntent", Some("second part")), "chat1", "chat1");
        let outcome = sessions.handle(&intent_request("s1", "AMAZON.StopIntent", None), "chat1", "chat1");
        match outcome {
            AlexaOutcome::RespondAndDispatch(_, msg) => {
                assert_eq!(msg.text.as_deref(), Some("first part. second part"));
                assert!(msg.update_id >= SYNTHETIC_UPDATE_ID_BASE);
                assert_eq!(msg.chat_id, "chat1");
            }
            _ => panic!("expected a dispatch"),
        }
    }

    #[test]
    fn stop_without_a_session_just_responds() {
        let sessions = AlexaSessions::new();
        let outcome = sessions.handle(&intent_request("unknown", "AMAZON.StopIntent", None), "chat1", "chat1");
        assert!(matches!(outcome, AlexaOutcome::Respond(_)));
    }
}
