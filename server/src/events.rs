//! Pre/post mutation event bus scoped to one server instance.
//!
//! Every authoritative mutation raises a cancellable pre-event before the
//! commit and an informational post-event after it. A pre-event subscriber
//! returning `false` vetoes the mutation; the post-event then never fires.
//! The bus is injected wherever it is needed rather than registered in any
//! process-global state, so events never leak between server instances.
//!
//! Dispatch is synchronous on the mutator thread: vetoes must be resolved
//! before the commit, so pre-handlers cannot be asynchronous. Ordering is
//! pre-then-post per mutation; across unrelated mutations no total order is
//! guaranteed.

use log::debug;
use shared::{ParameterDescriptor, ParameterValue};
use std::sync::{Arc, Mutex};

/// Full state of one channel as pushed to the controller on channel add.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub name: String,
    pub modifier: String,
    pub parameters: Vec<ParameterDescriptor>,
}

/// Cancellable notification raised before a mutation commits.
#[derive(Debug, Clone)]
pub enum PreEvent {
    ChannelAdd {
        name: String,
    },
    ChannelRemove {
        name: String,
    },
    ChannelRename {
        old_name: String,
        new_name: String,
    },
    PlayerJoin {
        channel: String,
        player: String,
    },
    PlayerLeave {
        channel: String,
        player: String,
    },
    ModifierChange {
        channel: String,
        modifier: String,
    },
    ParameterChange {
        channel: String,
        modifier: String,
        parameter: String,
        requested: ParameterValue,
    },
}

/// Informational notification raised after a mutation committed.
#[derive(Debug, Clone)]
pub enum PostEvent {
    ChannelAdded {
        channel: ChannelSnapshot,
    },
    ChannelRemoved {
        name: String,
    },
    ChannelRenamed {
        old_name: String,
        new_name: String,
    },
    PlayerJoined {
        channel: String,
        player: String,
    },
    PlayerLeft {
        channel: String,
        player: String,
    },
    ModifierChanged {
        channel: String,
        modifier: String,
    },
    ParameterChanged {
        channel: String,
        modifier: String,
        parameter: String,
        old: ParameterValue,
    },
}

/// Handle returned by subscription, used for deterministic revocation.
pub type SubscriptionId = u64;

type PreHandler = Arc<dyn Fn(&PreEvent) -> bool + Send + Sync>;
type PostHandler = Arc<dyn Fn(&PostEvent) + Send + Sync>;

#[derive(Default)]
struct Registrations {
    next_id: SubscriptionId,
    pre: Vec<(SubscriptionId, PreHandler)>,
    post: Vec<(SubscriptionId, PostHandler)>,
}

/// Publish/subscribe service for one server instance.
#[derive(Default)]
pub struct EventBus {
    inner: Mutex<Registrations>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a pre-event handler. The handler returns `false` to veto
    /// the pending mutation.
    pub fn subscribe_pre<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&PreEvent) -> bool + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.pre.push((id, Arc::new(handler)));
        id
    }

    /// Subscribes a post-event handler.
    pub fn subscribe_post<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&PostEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.post.push((id, Arc::new(handler)));
        id
    }

    /// Revokes a subscription. Returns false if the id was already revoked.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let before = inner.pre.len() + inner.post.len();
        inner.pre.retain(|(sub_id, _)| *sub_id != id);
        inner.post.retain(|(sub_id, _)| *sub_id != id);
        before != inner.pre.len() + inner.post.len()
    }

    /// Delivers a pre-event to every subscriber. Returns `true` if the
    /// mutation may proceed, `false` if any subscriber vetoed it.
    pub fn publish_pre(&self, event: &PreEvent) -> bool {
        // Handlers run outside the lock so they may subscribe/unsubscribe
        let handlers: Vec<PreHandler> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.pre.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        for handler in handlers {
            if !handler(event) {
                debug!("Mutation vetoed: {:?}", event);
                return false;
            }
        }
        true
    }

    /// Delivers a post-event to every subscriber.
    pub fn publish_post(&self, event: &PostEvent) {
        let handlers: Vec<PostHandler> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.post.iter().map(|(_, h)| Arc::clone(h)).collect()
        };

        for handler in handlers {
            handler(event);
        }
    }
}
