//! In-process event bus
//!
//! Channelized publish/subscribe over opaque topic strings. Every
//! subscription owns a bounded inbox; when an inbox overflows the oldest
//! message is dropped and a lagging flag latches until the subscriber reads
//! it. Publishing never blocks and a slow subscriber never affects other
//! subscribers. Dropping a [`Subscription`] unsubscribes it; the publisher
//! sweeps dead subscriptions on the next publish to that topic.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;

use crate::models::Event;

pub const DEFAULT_INBOX_CAPACITY: usize = 256;

struct Inbox {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    lagging: AtomicBool,
    capacity: usize,
}

impl Inbox {
    fn push(&self, event: Event) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.lagging.store(true, Ordering::SeqCst);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Event> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        queue.pop_front()
    }
}

/// Handle for one topic subscription. Dropping it unsubscribes.
pub struct Subscription {
    topic: String,
    inbox: Arc<Inbox>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Receive the next event, waiting until one is published.
    pub async fn recv(&self) -> Event {
        loop {
            if let Some(event) = self.inbox.pop() {
                return event;
            }
            self.inbox.notify.notified().await;
        }
    }

    /// Receive without waiting.
    pub fn try_recv(&self) -> Option<Event> {
        self.inbox.pop()
    }

    /// True if the inbox overflowed since the last call; reading clears it.
    pub fn take_lagging(&self) -> bool {
        self.inbox.lagging.swap(false, Ordering::SeqCst)
    }
}

/// Process-local pub/sub hub.
pub struct EventBus {
    topics: Mutex<HashMap<String, Vec<Weak<Inbox>>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to a topic. The returned handle is the only strong reference
    /// to the inbox, so dropping it detaches the subscriber.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let inbox = Arc::new(Inbox {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            lagging: AtomicBool::new(false),
            capacity: self.capacity,
        });

        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.to_string())
            .or_default()
            .push(Arc::downgrade(&inbox));

        Subscription {
            topic: topic.to_string(),
            inbox,
        }
    }

    /// Publish an event on its canonical topic. Fan-out happens under the
    /// topic map lock so subscribers observe emission order.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());

        let Some(subscribers) = topics.get_mut(&topic) else {
            return;
        };

        subscribers.retain(|weak| match weak.upgrade() {
            Some(inbox) => {
                inbox.push(event.clone());
                true
            }
            None => false,
        });

        if subscribers.is_empty() {
            topics.remove(&topic);
        }
    }

    /// Number of live subscriptions on a topic (dead handles not yet swept
    /// are counted until the next publish).
    pub fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .get(topic)
            .map(|subs| subs.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
