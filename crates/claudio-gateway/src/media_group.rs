//! Telegram sends each photo in an album as a separate webhook update
//! sharing a `media_group_id`. We buffer them for a short quiet period and
//! merge into one synthetic message so the pipeline sees "one image plus N
//! extras" rather than N independent turns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use claudio_core::ParsedMessage;
use tokio::task::JoinHandle;

/// Not a crisp SLA — just long enough that Telegram's per-photo updates for
/// one album normally all arrive before it fires.
const MEDIA_GROUP_WAIT: Duration = Duration::from_millis(1500);

struct Entry {
    bot_id: String,
    messages: Vec<ParsedMessage>,
    timer: JoinHandle<()>,
}

pub type FlushFn = Arc<dyn Fn(String, ParsedMessage) + Send + Sync>;

#[derive(Clone)]
pub struct MediaGroupCoalescer {
    buffers: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MediaGroupCoalescer {
    pub fn new() -> Self {
        Self {
            buffers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Feed a parsed message through the coalescer. Messages without a
    /// `media_group_id` are flushed immediately. Otherwise the message is
    /// buffered and the group's quiet-period timer is reset; `on_flush`
    /// fires once the group goes quiet.
    pub fn add(&self, bot_id: String, msg: ParsedMessage, on_flush: FlushFn) {
        let Some(group_id) = msg.media_group_id.clone() else {
            on_flush(bot_id, msg);
            return;
        };

        let mut buffers = self.buffers.lock().unwrap();
        if let Some(entry) = buffers.get_mut(&group_id) {
            entry.timer.abort();
            entry.messages.push(msg);
        } else {
            buffers.insert(
                group_id.clone(),
                Entry {
                    bot_id: bot_id.clone(),
                    messages: vec![msg],
                    timer: tokio::spawn(async {}),
                },
            );
        }

        let buffers_handle = self.buffers.clone();
        let timer_group_id = group_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(MEDIA_GROUP_WAIT).await;
            let flushed = {
                let mut guard = buffers_handle.lock().unwrap();
                guard.remove(&timer_group_id)
            };
            if let Some(entry) = flushed {
                if let Some(merged) = merge(entry.messages) {
                    on_flush(entry.bot_id, merged);
                }
            }
        });
        buffers.get_mut(&group_id).unwrap().timer = timer;
    }

    /// SIGTERM step 2: flush every pending group immediately rather than
    /// waiting out their timers.
    pub async fn flush_all(&self, on_flush: FlushFn) {
        let entries: Vec<Entry> = {
            let mut buffers = self.buffers.lock().unwrap();
            buffers.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.timer.abort();
            let bot_id = entry.bot_id.clone();
            if let Some(merged) = merge(entry.messages) {
                on_flush(bot_id, merged);
            }
        }
    }
}

fn merge(mut messages: Vec<ParsedMessage>) -> Option<ParsedMessage> {
    messages.sort_by_key(|m| m.update_id);
    let mut iter = messages.into_iter();
    let mut first = iter.next()?;
    for rest in iter {
        if let Some(extra) = rest.image {
            first.extra_images.push(extra);
        }
        first.extra_images.extend(rest.extra_images);
        if first.caption.is_none() {
            first.caption = rest.caption;
        }
    }
    Some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use claudio_core::{MessageKind, Platform};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn base(update_id: i64, group: Option<&str>) -> ParsedMessage {
        ParsedMessage {
            platform: Platform::Telegram,
            update_id,
            chat_id: "c1".into(),
            message_id: update_id.to_string(),
            sender_id: "s1".into(),
            kind: MessageKind::Image,
            text: None,
            caption: None,
            image: Some(claudio_core::MediaRef {
                file_id: format!("f{update_id}"),
                mime_type: None,
                file_name: None,
            }),
            extra_images: vec![],
            document: None,
            voice: None,
            reply_to: None,
            media_group_id: group.map(|g| g.to_string()),
        }
    }

    #[test]
    fn messages_without_a_group_flush_immediately() {
        let coalescer = MediaGroupCoalescer::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        coalescer.add("bot1".to_string(), base(1, None), Arc::new(move |_, _| { c.fetch_add(1, Ordering::SeqCst); }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn grouped_messages_merge_after_the_quiet_period() {
        let coalescer = MediaGroupCoalescer::new();
        let merged = Arc::new(Mutex::new(None));
        let m = merged.clone();
        let on_flush: FlushFn = Arc::new(move |bot_id, msg| {
            *m.lock().unwrap() = Some((bot_id, msg));
        });
        coalescer.add("bot1".to_string(), base(1, Some("g1")), on_flush.clone());
        coalescer.add("bot1".to_string(), base(2, Some("g1")), on_flush.clone());

        tokio::time::sleep(Duration::from_millis(1700)).await;
        let (bot_id, result) = merged.lock().unwrap().take().expect("group should have flushed");
        assert_eq!(bot_id, "bot1");
        assert_eq!(result.extra_images.len(), 1);
    }
}
