//! Per-chat ordering: a bounded FIFO queue per `(bot_id, chat_id)` plus a
//! sliding-window update-id dedup set, both behind one coarse mutex (REDESIGN
//! note: channels for dispatch, a single state mutex for the maps — no
//! scattered locking). Critical sections here are O(1); the worker itself
//! never runs with the lock held.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use claudio_core::{ChatQueueKey, ParsedMessage};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const QUEUE_BOUND: usize = 5;
const DEDUP_WINDOW: usize = 1000;
const WORKER_TIMEOUT: Duration = Duration::from_secs(600);
const SHUTDOWN_DRAIN_GRACE: Duration = Duration::from_secs(10);

pub type ProcessFn =
    Arc<dyn Fn(ChatQueueKey, ParsedMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

struct Inner {
    dedup_order: VecDeque<i64>,
    dedup_set: HashSet<i64>,
    queues: HashMap<ChatQueueKey, VecDeque<ParsedMessage>>,
    active_workers: HashSet<ChatQueueKey>,
    shutting_down: bool,
}

/// Owns every chat queue in the process. Cloned cheaply (`Arc` inside) and
/// shared across Axum handlers.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Mutex<Inner>>,
    workers: Arc<Mutex<HashMap<ChatQueueKey, JoinHandle<()>>>>,
    process: ProcessFn,
}

impl Dispatcher {
    pub fn new(process: ProcessFn) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                dedup_order: VecDeque::new(),
                dedup_set: HashSet::new(),
                queues: HashMap::new(),
                active_workers: HashSet::new(),
                shutting_down: false,
            })),
            workers: Arc::new(Mutex::new(HashMap::new())),
            process,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().unwrap().shutting_down
    }

    /// First step of SIGTERM handling: webhooks start returning 503.
    pub fn begin_shutdown(&self) {
        self.inner.lock().unwrap().shutting_down = true;
    }

    /// `true` if this update-id has been seen before (within the sliding
    /// window); the id is recorded regardless, LRU-evicting the oldest once
    /// the window is full.
    pub fn seen_update(&self, update_id: i64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.dedup_set.contains(&update_id) {
            return true;
        }
        inner.dedup_set.insert(update_id);
        inner.dedup_order.push_back(update_id);
        if inner.dedup_order.len() > DEDUP_WINDOW {
            if let Some(oldest) = inner.dedup_order.pop_front() {
                inner.dedup_set.remove(&oldest);
            }
        }
        false
    }

    /// Append `body` to the queue for `key`, spawning a worker if none is
    /// currently active for it. Drops the message with a warning if the
    /// queue is already at capacity.
    pub fn enqueue(&self, key: ChatQueueKey, body: ParsedMessage) {
        let needs_worker = {
            let mut inner = self.inner.lock().unwrap();
            let queue = inner.queues.entry(key.clone()).or_default();
            if queue.len() >= QUEUE_BOUND {
                warn!(%key, "chat queue full, dropping message");
                return;
            }
            queue.push_back(body);
            if queue.len() * 10 >= QUEUE_BOUND * 8 {
                warn!(%key, depth = queue.len(), "chat queue at 80% capacity");
            }
            inner.active_workers.insert(key.clone())
        };

        if needs_worker {
            self.spawn_worker(key);
        }
    }

    fn spawn_worker(&self, key: ChatQueueKey) {
        let inner = self.inner.clone();
        let workers = self.workers.clone();
        let process = self.process.clone();
        let worker_key = key.clone();

        let handle = tokio::spawn(async move {
            loop {
                let next = {
                    let mut guard = inner.lock().unwrap();
                    match guard.queues.get_mut(&worker_key).and_then(VecDeque::pop_front) {
                        Some(body) => Some(body),
                        None => {
                            guard.queues.remove(&worker_key);
                            guard.active_workers.remove(&worker_key);
                            None
                        }
                    }
                };

                let Some(body) = next else { break };

                match tokio::time::timeout(WORKER_TIMEOUT, process(worker_key.clone(), body)).await {
                    Ok(()) => {}
                    Err(_) => warn!(key = %worker_key, "pipeline run timed out, continuing with next queued message"),
                }
            }
        });

        self.workers.lock().unwrap().insert(key, handle);
    }

    /// SIGTERM step 4: join every still-running worker, each bounded by the
    /// per-message timeout plus ten seconds.
    pub async fn drain(&self) {
        let handles: Vec<(ChatQueueKey, JoinHandle<()>)> = {
            let mut workers = self.workers.lock().unwrap();
            workers.drain().collect()
        };
        for (key, handle) in handles {
            let deadline = WORKER_TIMEOUT + SHUTDOWN_DRAIN_GRACE;
            if tokio::time::timeout(deadline, handle).await.is_err() {
                warn!(key = %key, "worker did not finish within the shutdown grace period");
            } else {
                info!(key = %key, "worker drained cleanly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claudio_core::{MessageKind, Platform};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_message(n: i64) -> ParsedMessage {
        ParsedMessage {
            platform: Platform::Telegram,
            update_id: n,
            chat_id: "chat1".into(),
            message_id: n.to_string(),
            sender_id: "s1".into(),
            kind: MessageKind::Text,
            text: Some(format!("msg {n}")),
            caption: None,
            image: None,
            extra_images: Vec::new(),
            document: None,
            voice: None,
            reply_to: None,
            media_group_id: None,
        }
    }

    fn counting_dispatcher() -> (Dispatcher, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let process: ProcessFn = Arc::new(move |_key, _body| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        (Dispatcher::new(process), count)
    }

    #[test]
    fn seen_update_flags_repeats() {
        let (dispatcher, _count) = counting_dispatcher();
        assert!(!dispatcher.seen_update(1));
        assert!(dispatcher.seen_update(1));
        assert!(!dispatcher.seen_update(2));
    }

    #[tokio::test]
    async fn enqueue_spawns_a_worker_that_drains_the_queue() {
        let (dispatcher, count) = counting_dispatcher();
        let key = ChatQueueKey::new("bot1", "chat1");
        dispatcher.enqueue(key.clone(), test_message(1));
        dispatcher.enqueue(key, test_message(2));

        for _ in 0..50 {
            if count.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn queue_drops_messages_past_the_bound() {
        let (dispatcher, _count) = counting_dispatcher();
        dispatcher.begin_shutdown();
        assert!(dispatcher.is_shutting_down());

        let key = ChatQueueKey::new("bot1", "chat1");
        {
            let mut inner = dispatcher.inner.lock().unwrap();
            inner.queues.insert(key.clone(), (0..QUEUE_BOUND as i64).map(test_message).collect());
        }
        dispatcher.enqueue(key.clone(), test_message(999));
        let depth = dispatcher.inner.lock().unwrap().queues.get(&key).map(VecDeque::len);
        assert_eq!(depth, Some(QUEUE_BOUND));
    }
}
