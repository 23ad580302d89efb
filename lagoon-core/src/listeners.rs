//! Registered listener sets.
//!
//! A [`Listeners`] keeps listeners in registration order and fans a
//! notification out to each of them through an [`Executor`], one task per
//! listener. The set is shared: clones observe the same registrations.
//! Use [`Listeners::snapshot`] for an independent copy.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::executor::Executor;

/// Ordered, shared set of listeners of type `L`.
pub struct Listeners<L: ?Sized + Send + Sync + 'static> {
    inner: Arc<RwLock<Vec<Arc<L>>>>,
}

impl<L: ?Sized + Send + Sync + 'static> Listeners<L> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a listener. It is notified after the ones already present.
    pub fn add(&self, listener: Arc<L>) {
        self.inner.write().push(listener);
    }

    /// Unregister a listener, matched by identity. Returns whether it was present.
    pub fn remove(&self, listener: &Arc<L>) -> bool {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|l| !Arc::ptr_eq(l, listener));
        inner.len() != before
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// True when no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Submit `f` once per listener to `executor`.
    ///
    /// The listener list is captured before submitting, so listeners added
    /// during delivery only see later notifications.
    pub fn notify<F>(&self, executor: &dyn Executor, f: F)
    where
        F: Fn(&L) + Send + Sync + 'static,
    {
        let listeners: Vec<Arc<L>> = self.inner.read().clone();
        if listeners.is_empty() {
            return;
        }
        let f = Arc::new(f);
        for listener in listeners {
            let f = f.clone();
            executor.execute(Box::new(move || f(&listener)));
        }
    }

    /// Independent copy holding the same listeners.
    pub fn snapshot(&self) -> Self {
        Self {
            inner: Arc::new(RwLock::new(self.inner.read().clone())),
        }
    }
}

impl<L: ?Sized + Send + Sync + 'static> Clone for Listeners<L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<L: ?Sized + Send + Sync + 'static> Default for Listeners<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized + Send + Sync + 'static> std::fmt::Debug for Listeners<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.len())
            .finish()
    }
}
