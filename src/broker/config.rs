//! Broker configuration.

use serde::{Deserialize, Serialize};

/// Tuning knobs of a broker instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Capacity of the single inbound envelope queue. Submission beyond it
    /// fails fast instead of blocking the sending context.
    pub inbox_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 256,
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_inbox_capacity(mut self, capacity: usize) -> Self {
        self.inbox_capacity = capacity;
        self
    }
}
