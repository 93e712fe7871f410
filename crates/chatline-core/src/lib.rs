//! # chatline-core
//!
//! Core types and in-process publish/subscribe for chatline.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Message** - Chat messages, submitted messages, online users
//! - **MessageBus** - Per-channel append-only logs with live fan-out
//! - **Presence** - Registry of connected users with connect/disconnect events
//! - **Subscribers** - Ordered callback lists with drop-to-unsubscribe handles
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  publish  ┌─────────────┐  notify   ┌─────────────┐
//! │  HTTP layer │──────────▶│ MessageBus  │──────────▶│  Sessions   │
//! └─────────────┘           └─────────────┘           └─────────────┘
//!                                                            ▲
//!                           ┌─────────────┐  notify          │
//!                           │  Presence   │──────────────────┘
//!                           └─────────────┘
//! ```

pub mod bus;
pub mod channel;
pub mod message;
pub mod presence;
pub mod subscribers;

pub use bus::{BusStats, MessageBus, MessageEvent, DEFAULT_PAGE_AMOUNT};
pub use channel::{validate_channel_name, ChannelId};
pub use message::{Message, MessageId, OnlineUser, SentMessage};
pub use presence::{PresenceEvent, PresenceRegistry};
pub use subscribers::{Subscribers, Subscription, SubscriptionId};
