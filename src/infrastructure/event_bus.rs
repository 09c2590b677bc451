// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Topic Fan-Out for Verified Envelopes
//
// In-memory only: envelopes are fanned out to live subscribers and lost on
// restart. Each subscriber owns a bounded queue; a subscriber that cannot
// keep up is evicted (its stream closes) rather than blocking the publisher
// or costing other subscribers messages. Subject matching is exact.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::envelope::Envelope;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type Registry = Mutex<HashMap<String, Vec<BusSlot>>>;

struct BusSlot {
    id: u64,
    sender: mpsc::Sender<Arc<Envelope>>,
}

/// Topic fan-out bus for accepted envelopes.
#[derive(Clone)]
pub struct EventBus {
    capacity: usize,
    topics: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }

    /// Open a subscription for one subject. The returned handle owns the
    /// queue; dropping it unregisters the subscriber.
    pub fn subscribe(&self, subject: &str) -> BusSubscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .lock()
            .entry(subject.to_string())
            .or_default()
            .push(BusSlot { id, sender });
        debug!(subject, subscriber = id, "bus subscription opened");
        BusSubscription {
            subject: subject.to_string(),
            id,
            receiver,
            topics: Arc::clone(&self.topics),
        }
    }

    /// Fan an envelope out to every subscriber of `subject`.
    ///
    /// Non-blocking for the caller: the registry lock is held only to
    /// snapshot the subscriber list, then each push is a `try_send`. A full
    /// queue evicts that subscriber; everyone else still receives the
    /// message. Returns the number of subscribers reached.
    pub fn publish(&self, subject: &str, envelope: Arc<Envelope>) -> usize {
        let targets: Vec<(u64, mpsc::Sender<Arc<Envelope>>)> = {
            let topics = self.topics.lock();
            match topics.get(subject) {
                Some(slots) => slots
                    .iter()
                    .map(|s| (s.id, s.sender.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut evicted = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(Arc::clone(&envelope)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subject, subscriber = id, "evicting slow subscriber");
                    evicted.push(id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => evicted.push(id),
            }
        }

        if !evicted.is_empty() {
            let mut topics = self.topics.lock();
            if let Some(slots) = topics.get_mut(subject) {
                slots.retain(|s| !evicted.contains(&s.id));
                if slots.is_empty() {
                    topics.remove(subject);
                }
            }
        }

        delivered
    }

    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.topics
            .lock()
            .get(subject)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// One subscriber's end of a topic queue. Messages for a single subject
/// arrive in the order the bus accepted them.
pub struct BusSubscription {
    subject: String,
    id: u64,
    receiver: mpsc::Receiver<Arc<Envelope>>,
    topics: Arc<Registry>,
}

impl BusSubscription {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Receive the next envelope; `None` once the subscription is closed
    /// (dropped or evicted).
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        let mut topics = self.topics.lock();
        if let Some(slots) = topics.get_mut(&self.subject) {
            slots.retain(|s| s.id != self.id);
            if slots.is_empty() {
                topics.remove(&self.subject);
            }
        }
        debug!(subject = %self.subject, subscriber = self.id, "bus subscription closed");
    }
}
