//! Mutation event bus used for cache invalidation.
//!
//! Topics are typed `(collection, mutation kind)` pairs rather than ad hoc
//! strings, and every subscription is an owned handle that can be disposed
//! explicitly (or by dropping it). Callbacks decide per delivery whether to
//! stay registered, so one-shot listeners are "subscribe, and on first
//! matching delivery, dispose".

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

/// Kind of mutation an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// Rows were created.
    Create,
    /// Rows were updated.
    Update,
    /// Rows were deleted.
    Delete,
}

impl MutationKind {
    /// The lowercase wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

/// A typed event topic, rendered as `<collection>.<kind>` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    /// Mutated collection.
    pub collection: String,
    /// Mutation kind.
    pub kind: MutationKind,
}

impl Topic {
    /// Create a topic.
    pub fn new(collection: impl Into<String>, kind: MutationKind) -> Self {
        Self {
            collection: collection.into(),
            kind,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.kind.as_str())
    }
}

/// A delivered mutation event.
#[derive(Debug, Clone)]
pub struct MutationEvent {
    /// Topic the event was published on.
    pub topic: Topic,
    /// Primary keys of the mutated rows. Empty for create events, where the
    /// new keys are not known to interested listeners anyway.
    pub keys: Vec<String>,
}

/// What a callback wants done with its subscription after a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerOutcome {
    /// Keep the subscription registered.
    Retain,
    /// Remove the subscription.
    Dispose,
}

type Callback = Arc<dyn Fn(&MutationEvent) -> ListenerOutcome + Send + Sync>;

struct Listener {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct Listeners {
    by_topic: HashMap<Topic, Vec<Listener>>,
}

/// In-process mutation event bus.
pub struct EventBus {
    listeners: Arc<RwLock<Listeners>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Listeners::default())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback for a topic, returning its owned handle.
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&MutationEvent) -> ListenerOutcome + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut listeners = self.listeners.write();
        listeners.by_topic.entry(topic.clone()).or_default().push(Listener {
            id,
            callback: Arc::new(callback),
        });
        trace!(topic = %topic, id, "subscribed");

        Subscription {
            listeners: Arc::downgrade(&self.listeners),
            topic,
            id,
        }
    }

    /// Register a callback that disposes itself after its first delivery.
    pub fn subscribe_once<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&MutationEvent) + Send + Sync + 'static,
    {
        self.subscribe(topic, move |event| {
            callback(event);
            ListenerOutcome::Dispose
        })
    }

    /// Deliver an event to every listener on its topic, dropping the ones
    /// that ask to be disposed.
    ///
    /// Delivery runs against a snapshot taken under the lock and released
    /// before any callback runs, so callbacks may subscribe, publish, or
    /// dispose handles on this same bus.
    pub fn publish(&self, event: &MutationEvent) {
        let snapshot: Vec<(u64, Callback)> = {
            let listeners = self.listeners.read();
            let Some(registered) = listeners.by_topic.get(&event.topic) else {
                return;
            };
            registered
                .iter()
                .map(|listener| (listener.id, Arc::clone(&listener.callback)))
                .collect()
        };

        let mut disposed = Vec::new();
        for (id, callback) in snapshot {
            if callback(event) == ListenerOutcome::Dispose {
                disposed.push(id);
            }
        }
        if disposed.is_empty() {
            return;
        }

        let mut listeners = self.listeners.write();
        if let Some(registered) = listeners.by_topic.get_mut(&event.topic) {
            registered.retain(|listener| !disposed.contains(&listener.id));
            if registered.is_empty() {
                listeners.by_topic.remove(&event.topic);
            }
        }
    }

    /// Number of live listeners across all topics.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .by_topic
            .values()
            .map(Vec::len)
            .sum()
    }
}

/// Owned handle to one registration. Disposing (or dropping) it removes the
/// listener if it is still registered.
pub struct Subscription {
    listeners: Weak<RwLock<Listeners>>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    /// Remove the listener.
    pub fn dispose(self) {
        // Drop does the work.
    }

    /// Detach the handle without removing the listener; the listener then
    /// lives until it disposes itself from a delivery.
    pub fn detach(mut self) {
        self.listeners = Weak::new();
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            let mut listeners = listeners.write();
            if let Some(registered) = listeners.by_topic.get_mut(&self.topic) {
                registered.retain(|listener| listener.id != self.id);
                if registered.is_empty() {
                    listeners.by_topic.remove(&self.topic);
                }
            }
        }
    }
}
