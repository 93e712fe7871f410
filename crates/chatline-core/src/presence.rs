//! Presence tracking for chatline.
//!
//! The registry holds every authenticated user across all channels and
//! broadcasts connect/disconnect events to every subscriber, whatever
//! channel the subscriber is in. Only [`PresenceRegistry::list_online`]
//! filters by channel.

use crate::message::OnlineUser;
use crate::subscribers::{Subscribers, Subscription};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// A presence change.
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    /// The user completed a handshake.
    Online(Arc<OnlineUser>),
    /// The user's session ended.
    Offline(Arc<OnlineUser>),
}

impl PresenceEvent {
    /// The user the event is about.
    #[must_use]
    pub fn user(&self) -> &Arc<OnlineUser> {
        match self {
            Self::Online(user) | Self::Offline(user) => user,
        }
    }
}

/// Registry of connected users.
///
/// Events are sent while the registry is locked, so every subscriber sees
/// connects and disconnects in the order they were applied. Callbacks must
/// not call back into the registry.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    /// Connected users, in connect order.
    online: Mutex<Vec<Arc<OnlineUser>>>,
    /// Subscribers to presence events.
    subscribers: Subscribers<PresenceEvent>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user and notify every subscriber.
    pub fn connect(&self, user: Arc<OnlineUser>) {
        let mut online = self.online.lock().unwrap_or_else(PoisonError::into_inner);
        online.push(user.clone());
        debug!(user = %user.username, channel = %user.channel, "Presence: user online");

        self.subscribers.notify(&PresenceEvent::Online(user));
    }

    /// Remove a user and notify every subscriber.
    ///
    /// Users are matched by identity. Returns `false`, without notifying, if
    /// this exact user was not registered.
    pub fn disconnect(&self, user: &Arc<OnlineUser>) -> bool {
        let mut online = self.online.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(index) = online.iter().position(|u| Arc::ptr_eq(u, user)) else {
            return false;
        };
        online.remove(index);
        debug!(user = %user.username, channel = %user.channel, "Presence: user offline");

        self.subscribers.notify(&PresenceEvent::Offline(user.clone()));
        true
    }

    /// Users currently online in `channel`, in connect order.
    #[must_use]
    pub fn list_online(&self, channel: &str) -> Vec<Arc<OnlineUser>> {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|u| u.channel == channel)
            .cloned()
            .collect()
    }

    /// Whether this exact user is registered.
    #[must_use]
    pub fn is_online(&self, user: &Arc<OnlineUser>) -> bool {
        self.online
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|u| Arc::ptr_eq(u, user))
    }

    /// Number of users online across all channels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.online.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Register a callback for every presence event.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&PresenceEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, channel: &str) -> Arc<OnlineUser> {
        Arc::new(OnlineUser::new(name, "key", channel))
    }

    #[test]
    fn test_presence_connect_disconnect() {
        let registry = PresenceRegistry::new();
        let alice = user("alice", "lobby");

        registry.connect(alice.clone());
        assert!(registry.is_online(&alice));
        assert_eq!(registry.count(), 1);

        assert!(registry.disconnect(&alice));
        assert!(!registry.is_online(&alice));
        assert!(!registry.disconnect(&alice));
    }

    #[test]
    fn test_list_online_filters_by_channel() {
        let registry = PresenceRegistry::new();
        registry.connect(user("alice", "lobby"));
        registry.connect(user("bob", "games"));
        registry.connect(user("carol", "lobby"));

        let names: Vec<String> = registry
            .list_online("lobby")
            .iter()
            .map(|u| u.username.clone())
            .collect();
        assert_eq!(names, ["alice", "carol"]);
        assert!(registry.list_online("empty").is_empty());
    }

    #[test]
    fn test_identity_not_value() {
        let registry = PresenceRegistry::new();
        let first = user("twin", "lobby");
        let second = user("twin", "lobby");
        assert_eq!(*first, *second);

        registry.connect(first.clone());
        registry.connect(second.clone());
        assert!(registry.disconnect(&second));

        assert!(registry.is_online(&first));
        assert!(!registry.is_online(&second));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_events_are_not_channel_filtered() {
        let registry = PresenceRegistry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let events = events.clone();
            registry.subscribe(move |e: &PresenceEvent| {
                let label = match e {
                    PresenceEvent::Online(u) => format!("online:{}:{}", u.username, u.channel),
                    PresenceEvent::Offline(u) => format!("offline:{}:{}", u.username, u.channel),
                };
                events.lock().unwrap().push(label);
            })
        };

        let alice = user("alice", "lobby");
        let bob = user("bob", "games");
        registry.connect(alice.clone());
        registry.connect(bob.clone());
        registry.disconnect(&alice);

        assert_eq!(
            *events.lock().unwrap(),
            ["online:alice:lobby", "online:bob:games", "offline:alice:lobby"]
        );
    }

    #[test]
    fn test_unknown_disconnect_is_silent() {
        let registry = PresenceRegistry::new();
        let events = Arc::new(Mutex::new(0));
        let _sub = {
            let events = events.clone();
            registry.subscribe(move |_: &PresenceEvent| *events.lock().unwrap() += 1)
        };

        assert!(!registry.disconnect(&user("ghost", "lobby")));
        assert_eq!(*events.lock().unwrap(), 0);
    }
}
