//! Topic-keyed publish/subscribe router with sequential, awaited delivery.
//!
//! The topic → listener table is fixed when the bus is built. For each topic
//! of a [`publish`](EventBus::publish) call, in caller order, every listener
//! runs to completion before the next one starts, and `publish` only returns
//! once all of them (and everything they published downstream) are done.
//!
//! | Situation | Behaviour |
//! |-----------|-----------|
//! | `(topic, seq)` already delivered | topic skipped silently |
//! | more than the dedup window delivered since | oldest keys forgotten |
//! | listener returns `Err` | logged, rest of that topic skipped, next topic continues |
//! | topic has no listeners | nothing happens, key still marked |

pub mod event;

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::{debug, trace, warn};

pub use event::{Content, DedupKey, Event, EventKind, PromptBundle, Topic};

/// Number of most recent deliveries remembered for deduplication.
pub const DEFAULT_DEDUP_WINDOW: usize = 4096;

/// Boxed future returned by [`Listener::listen`].
pub type ListenerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// Boxed future returned by [`EventBus::publish`].
pub type PublishFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A pipeline stage subscribed to one or more topics.
///
/// Listeners receive the bus itself so they can publish follow-up events;
/// those nested publishes are awaited inside the outer delivery.
pub trait Listener: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handle one event. An `Err` is logged by the bus and stops delivery to
    /// the remaining listeners of the current topic.
    fn listen<'a>(&'a self, event: &'a Event, bus: &'a EventBus) -> ListenerFuture<'a>;
}

// ── Builder ────────────────────────────────────────────────────────

/// Collects topic subscriptions before the bus is shared.
pub struct EventBusBuilder {
    listeners: HashMap<Topic, Vec<Arc<dyn Listener>>>,
    dedup_window: usize,
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self {
            listeners: HashMap::new(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

impl EventBusBuilder {
    /// Append a listener to a topic. Registration order is delivery order.
    pub fn subscribe(mut self, topic: Topic, listener: Arc<dyn Listener>) -> Self {
        self.listeners.entry(topic).or_default().push(listener);
        self
    }

    /// How many deliveries to remember; older keys are forgotten first.
    pub fn dedup_window(mut self, window: usize) -> Self {
        self.dedup_window = window.max(1);
        self
    }

    pub fn build(self) -> EventBus {
        for (topic, listeners) in &self.listeners {
            let names: Vec<&str> = listeners.iter().map(|l| l.name()).collect();
            debug!("Topic {topic}: {}", names.join(", "));
        }
        EventBus {
            listeners: self.listeners,
            processed: Mutex::new(Delivered::new(self.dedup_window)),
        }
    }
}

/// Bounded record of delivered keys, evicted oldest first.
struct Delivered {
    keys: HashSet<DedupKey>,
    order: VecDeque<DedupKey>,
    window: usize,
}

impl Delivered {
    fn new(window: usize) -> Self {
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
            window,
        }
    }

    fn contains(&self, key: &DedupKey) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: DedupKey) {
        if !self.keys.insert(key) {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.window {
            if let Some(old) = self.order.pop_front() {
                self.keys.remove(&old);
            }
        }
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

// ── Bus ────────────────────────────────────────────────────────────

pub struct EventBus {
    listeners: HashMap<Topic, Vec<Arc<dyn Listener>>>,
    processed: Mutex<Delivered>,
}

impl EventBus {
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    /// Number of listeners registered on a topic.
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.listeners.get(&topic).map_or(0, Vec::len)
    }

    /// Whether `key` has already been delivered.
    pub fn is_processed(&self, key: &DedupKey) -> bool {
        self.processed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }

    /// Number of delivery keys currently remembered.
    pub fn remembered(&self) -> usize {
        self.processed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn mark_processed(&self, key: DedupKey) {
        self.processed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key);
    }

    /// Deliver `event` to every listener of every topic in `topics`.
    pub fn publish<'a>(&'a self, topics: &'a [Topic], event: &'a Event) -> PublishFuture<'a> {
        Box::pin(async move {
            for &topic in topics {
                let key = event.dedup_key(topic);
                if self.is_processed(&key) {
                    trace!(
                        "Skipping {} #{} on {topic}: already delivered",
                        event.kind(),
                        event.seq()
                    );
                    continue;
                }

                let listeners = self.listeners.get(&topic).map_or(&[][..], Vec::as_slice);
                debug!(
                    "Publishing {} #{} to {topic} ({} listener(s))",
                    event.kind(),
                    event.seq(),
                    listeners.len()
                );

                for listener in listeners {
                    if let Err(e) = listener.listen(event, self).await {
                        warn!(
                            "Listener {} failed on {} #{} ({topic}): {e}",
                            listener.name(),
                            event.kind(),
                            event.seq()
                        );
                        break;
                    }
                }

                self.mark_processed(key);
            }
        })
    }
}
