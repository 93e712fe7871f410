//! Per-channel message logs with live fan-out.
//!
//! The bus appends each published message to its channel's log and then
//! notifies every subscriber, in registration order, on the publisher's task.

use crate::channel::ChannelId;
use crate::message::{Message, SentMessage};
use crate::subscribers::{Subscribers, Subscription};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Default number of messages returned by [`MessageBus::get_messages`].
pub const DEFAULT_PAGE_AMOUNT: usize = 12;

/// A message published to a channel.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// Channel the message was published to.
    pub channel: ChannelId,
    /// The stored message.
    pub message: Arc<Message>,
}

/// The message bus.
///
/// Logs are append-only and keep insertion order for the life of the
/// process. Appending and notifying happen under the channel's log lock, so
/// subscribers observe a channel's messages in log order.
#[derive(Debug, Default)]
pub struct MessageBus {
    /// Message logs indexed by channel name.
    logs: DashMap<ChannelId, Vec<Arc<Message>>>,
    /// Subscribers to new-message events, across all channels.
    subscribers: Subscribers<MessageEvent>,
}

impl MessageBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `message` to the channel's log and notify subscribers.
    ///
    /// Callbacks run while the channel's log is locked; they must not call
    /// back into the bus.
    pub fn publish(&self, channel: &str, message: Message) -> Arc<Message> {
        let message = Arc::new(message);

        let mut log = self.logs.entry(channel.to_string()).or_insert_with(|| {
            debug!(channel = %channel, "Creating message log");
            Vec::new()
        });
        log.push(message.clone());

        let event = MessageEvent {
            channel: channel.to_string(),
            message: message.clone(),
        };
        let recipients = self.subscribers.notify(&event);
        drop(log);

        trace!(channel = %channel, id = %message.id, recipients, "Published message");
        message
    }

    /// Stamp a client-submitted message and publish it.
    ///
    /// The client's signature is stored verbatim; it is not verified.
    pub fn add_message(&self, channel: &str, sent: SentMessage) -> Arc<Message> {
        self.publish(channel, Message::from(sent))
    }

    /// Page through a channel's history.
    ///
    /// Skips the first `offset` messages, then returns at most the last
    /// `amount` of what remains, oldest first.
    #[must_use]
    pub fn get_messages(&self, channel: &str, amount: usize, offset: usize) -> Vec<Arc<Message>> {
        let Some(log) = self.logs.get(channel) else {
            return Vec::new();
        };

        let remaining = log.get(offset..).unwrap_or_default();
        let start = remaining.len().saturating_sub(amount);
        remaining[start..].to_vec()
    }

    /// Register a callback for every new message on every channel.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    /// Number of messages stored for a channel.
    #[must_use]
    pub fn message_count(&self, channel: &str) -> usize {
        self.logs.get(channel).map(|log| log.len()).unwrap_or(0)
    }

    /// Get bus statistics.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            channel_count: self.logs.len(),
            message_count: self.logs.iter().map(|log| log.len()).sum(),
            subscriber_count: self.subscribers.len(),
        }
    }
}

/// Bus statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStats {
    /// Number of channels with a log.
    pub channel_count: usize,
    /// Total messages across all logs.
    pub message_count: usize,
    /// Number of registered subscribers.
    pub subscriber_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn seeded(count: usize) -> MessageBus {
        let bus = MessageBus::new();
        for i in 0..count {
            bus.publish("room", Message::new("alice", format!("m{i}"), "sig"));
        }
        bus
    }

    fn texts(messages: &[Arc<Message>]) -> Vec<&str> {
        messages.iter().map(|m| m.text.as_str()).collect()
    }

    #[test]
    fn test_pagination_takes_newest_after_offset() {
        let bus = seeded(10);
        assert_eq!(texts(&bus.get_messages("room", 3, 2)), ["m7", "m8", "m9"]);
        assert_eq!(texts(&bus.get_messages("room", 5, 9)), ["m9"]);
        assert!(bus.get_messages("room", 5, 10).is_empty());
        assert!(bus.get_messages("room", 5, 100).is_empty());
    }

    #[test]
    fn test_pagination_defaults_and_short_logs() {
        let bus = seeded(20);
        let page = bus.get_messages("room", DEFAULT_PAGE_AMOUNT, 0);
        assert_eq!(page.len(), 12);
        assert_eq!(page[0].text, "m8");
        assert_eq!(page[11].text, "m19");

        let bus = seeded(2);
        assert_eq!(texts(&bus.get_messages("room", 12, 0)), ["m0", "m1"]);
        assert!(bus.get_messages("room", 0, 0).is_empty());
    }

    #[test]
    fn test_unknown_channel_is_empty() {
        let bus = MessageBus::new();
        assert!(bus.get_messages("nowhere", 12, 0).is_empty());
        assert_eq!(bus.stats().channel_count, 0);
    }

    #[test]
    fn test_channels_are_independent() {
        let bus = MessageBus::new();
        bus.publish("a", Message::new("x", "in a", ""));
        bus.publish("b", Message::new("x", "in b", ""));

        assert_eq!(texts(&bus.get_messages("a", 12, 0)), ["in a"]);
        assert_eq!(texts(&bus.get_messages("b", 12, 0)), ["in b"]);
        assert_eq!(bus.stats().channel_count, 2);
    }

    #[test]
    fn test_publish_notifies_subscribers_in_order() {
        let bus = MessageBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = {
            let seen = seen.clone();
            bus.subscribe(move |e: &MessageEvent| {
                seen.lock().unwrap().push(format!("first:{}:{}", e.channel, e.message.text))
            })
        };
        let second = {
            let seen = seen.clone();
            bus.subscribe(move |e: &MessageEvent| {
                seen.lock().unwrap().push(format!("second:{}:{}", e.channel, e.message.text))
            })
        };

        bus.publish("room", Message::new("alice", "hi", ""));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:room:hi".to_string(), "second:room:hi".to_string()]
        );

        drop(first);
        bus.publish("other", Message::new("bob", "yo", ""));
        assert_eq!(seen.lock().unwrap().last().unwrap(), "second:other:yo");
        assert_eq!(bus.stats().subscriber_count, 1);
        drop(second);
    }

    #[test]
    fn test_add_message_stamps_and_stores() {
        let bus = MessageBus::new();
        let stored = bus.add_message(
            "room",
            SentMessage {
                creator_name: "alice".to_string(),
                text: "hello".to_string(),
                signature: "not-checked".to_string(),
            },
        );

        assert!(!stored.id.is_empty());
        assert_eq!(stored.signature, "not-checked");
        assert_eq!(bus.message_count("room"), 1);
        assert!(Arc::ptr_eq(&bus.get_messages("room", 1, 0)[0], &stored));
    }

    #[test]
    fn test_concurrent_publish_keeps_log_and_notification_order() {
        let bus = Arc::new(MessageBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            bus.subscribe(move |e: &MessageEvent| seen.lock().unwrap().push(e.message.id.clone()))
        };

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        bus.publish("room", Message::new("w", format!("{t}-{i}"), ""));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let log: Vec<String> = bus
            .get_messages("room", usize::MAX, 0)
            .iter()
            .map(|m| m.id.clone())
            .collect();
        assert_eq!(log.len(), 200);
        assert_eq!(*seen.lock().unwrap(), log);
    }
}
