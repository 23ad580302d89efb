//! Keyed protocol timeouts.
//!
//! Roles arm a timeout under a string key together with the message to
//! deliver when it fires. Re-arming a key replaces the previous timeout.
//! Scheduling is the embedder's concern; the context layer only needs the
//! [`Timeouts`] seam.

use std::cell::RefCell;
use std::collections::BTreeMap;

use tracing::trace;

use crate::message::Message;

/// Timeout service used by the protocol roles.
pub trait Timeouts {
    /// Arm (or re-arm) the timeout `key`, delivering `message` on expiry.
    fn set_timeout(&self, key: String, message: Message);

    /// Cancel the timeout `key`, if armed.
    fn cancel_timeout(&self, key: &str);

    /// Cancel every armed timeout.
    fn cancel_all_timeouts(&self);
}

/// Timeouts recorded in memory and never fired by themselves.
///
/// The owner decides when to fire by calling [`InMemoryTimeouts::fire`].
#[derive(Debug, Default)]
pub struct InMemoryTimeouts {
    pending: RefCell<BTreeMap<String, Message>>,
}

impl InMemoryTimeouts {
    /// Create an empty timeout table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is armed.
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.borrow().contains_key(key)
    }

    /// Keys of all armed timeouts, sorted.
    pub fn pending_keys(&self) -> Vec<String> {
        self.pending.borrow().keys().cloned().collect()
    }

    /// Disarm `key` and return its message, as if it had expired.
    pub fn fire(&self, key: &str) -> Option<Message> {
        self.pending.borrow_mut().remove(key)
    }
}

impl Timeouts for InMemoryTimeouts {
    fn set_timeout(&self, key: String, message: Message) {
        trace!(key = %key, message = message.name(), "timeout armed");
        self.pending.borrow_mut().insert(key, message);
    }

    fn cancel_timeout(&self, key: &str) {
        if self.pending.borrow_mut().remove(key).is_some() {
            trace!(key = %key, "timeout cancelled");
        }
    }

    fn cancel_all_timeouts(&self) {
        self.pending.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rearm_replaces_message() {
        let timeouts = InMemoryTimeouts::new();
        timeouts.set_timeout("join".to_string(), Message::new("first", Vec::<u8>::new()));
        timeouts.set_timeout("join".to_string(), Message::new("second", Vec::<u8>::new()));

        assert_eq!(timeouts.pending_keys(), vec!["join".to_string()]);
        let fired = timeouts.fire("join").expect("armed");
        assert_eq!(fired.name(), "second");
        assert!(!timeouts.is_pending("join"));
    }

    #[test]
    fn test_cancel() {
        let timeouts = InMemoryTimeouts::new();
        timeouts.set_timeout("a".to_string(), Message::default());
        timeouts.set_timeout("b".to_string(), Message::default());

        timeouts.cancel_timeout("a");
        timeouts.cancel_timeout("missing");
        assert_eq!(timeouts.pending_keys(), vec!["b".to_string()]);

        timeouts.cancel_all_timeouts();
        assert!(timeouts.pending_keys().is_empty());
    }
}
