//! Shared in-process state.

use chatline_core::{MessageBus, PresenceRegistry};

/// The stores shared by every session and the HTTP layer.
#[derive(Debug, Default)]
pub struct Hub {
    /// Per-channel message logs.
    pub bus: MessageBus,
    /// Connected users.
    pub presence: PresenceRegistry,
}

impl Hub {
    /// Create empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
