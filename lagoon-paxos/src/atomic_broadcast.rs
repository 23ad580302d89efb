//! Atomic broadcast role: delivers learned values to subscribers.

use std::sync::Arc;

use lagoon_core::{Listeners, Payload};
use tracing::debug;

use crate::state::ContextCommon;

/// Receives values in broadcast order.
pub trait AtomicBroadcastListener: Send + Sync {
    /// `value` was delivered.
    fn receive(&self, value: &Payload);
}

/// Atomic broadcast subscribers for one member.
#[derive(Debug)]
pub struct AtomicBroadcastContext {
    common: ContextCommon,
    listeners: Listeners<dyn AtomicBroadcastListener>,
}

impl AtomicBroadcastContext {
    /// Create the role with no subscribers.
    pub fn new(common: ContextCommon) -> Self {
        Self {
            common,
            listeners: Listeners::new(),
        }
    }

    /// Shared accessors.
    pub fn common(&self) -> &ContextCommon {
        &self.common
    }

    /// Subscribe `listener`.
    pub fn add_listener(&self, listener: Arc<dyn AtomicBroadcastListener>) {
        self.listeners.add(listener);
    }

    /// Unsubscribe `listener`. Returns whether it was subscribed.
    pub fn remove_listener(&self, listener: &Arc<dyn AtomicBroadcastListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Hand `value` to every subscriber through the executor.
    pub fn receive(&self, value: Payload) {
        debug!(bytes = value.len(), listeners = self.listeners.len(), "delivering value");
        self.listeners
            .notify(self.common.executor(), move |l| l.receive(&value));
    }

    /// Copy with its own subscriber list.
    pub fn snapshot(&self, common: ContextCommon) -> Self {
        Self {
            common,
            listeners: self.listeners.snapshot(),
        }
    }
}
