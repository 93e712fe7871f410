//! Ordered, removable event subscriptions.
//!
//! Both the message bus and the presence registry fan out events through a
//! [`Subscribers`] list. Callbacks run synchronously on the publisher's task,
//! in registration order, and must not block.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::trace;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Identifier of a registered callback; increases with registration order.
pub type SubscriptionId = u64;

trait Detach: Send + Sync {
    fn detach(&self, id: SubscriptionId) -> bool;
}

struct SubscriberList<E> {
    next_id: AtomicU64,
    callbacks: RwLock<BTreeMap<SubscriptionId, Callback<E>>>,
}

impl<E: 'static> Detach for SubscriberList<E> {
    fn detach(&self, id: SubscriptionId) -> bool {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

/// A list of callbacks notified in registration order.
pub struct Subscribers<E> {
    inner: Arc<SubscriberList<E>>,
}

impl<E: 'static> Subscribers<E> {
    /// Create an empty subscriber list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SubscriberList {
                next_id: AtomicU64::new(0),
                callbacks: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Register a callback.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or explicitly unsubscribed.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));

        let list: Arc<dyn Detach> = self.inner.clone();
        trace!(subscription = id, "Subscribed");
        Subscription {
            id,
            list: Arc::downgrade(&list),
        }
    }

    /// Invoke every registered callback with `event`, oldest first.
    ///
    /// Returns the number of callbacks invoked. The list lock is released
    /// before callbacks run, so callbacks may subscribe or unsubscribe.
    pub fn notify(&self, event: &E) -> usize {
        let callbacks: Vec<Callback<E>> = self
            .inner
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: 'static> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Subscribers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers").finish_non_exhaustive()
    }
}

/// Handle to a registered callback. Unsubscribes on drop.
///
/// Ownership makes removal exactly-once: the handle can be consumed by
/// [`Subscription::unsubscribe`] or dropped, never both.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    list: Weak<dyn Detach>,
}

impl Subscription {
    /// The subscription's identifier.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the callback now.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            if list.detach(self.id) {
                trace!(subscription = self.id, "Unsubscribed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_notify_in_registration_order() {
        let subscribers = Subscribers::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let seen = seen.clone();
                subscribers.subscribe(move |event: &u32| seen.lock().unwrap().push((i, *event)))
            })
            .collect();

        assert_eq!(subscribers.notify(&7), 3);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 7), (1, 7), (2, 7)]);
        drop(subs);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let subscribers = Subscribers::<()>::new();
        let sub = subscribers.subscribe(|_| {});
        let other = subscribers.subscribe(|_| {});
        assert_eq!(subscribers.len(), 2);

        drop(sub);
        assert_eq!(subscribers.len(), 1);

        other.unsubscribe();
        assert!(subscribers.is_empty());
        assert_eq!(subscribers.notify(&()), 0);
    }

    #[test]
    fn test_subscription_outlives_list() {
        let subscribers = Subscribers::<()>::new();
        let sub = subscribers.subscribe(|_| {});
        drop(subscribers);
        // Detaching from a dropped list is a no-op.
        drop(sub);
    }

    #[test]
    fn test_callback_may_unsubscribe_others() {
        let subscribers = Arc::new(Subscribers::<()>::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_clone = slot.clone();
        let _first = subscribers.subscribe(move |_| {
            slot_clone.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(subscribers.subscribe(|_| {}));

        assert_eq!(subscribers.notify(&()), 2);
        assert_eq!(subscribers.len(), 1);
    }
}
