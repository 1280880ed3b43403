//! Connector configuration and per-publication options.

use crate::message::Headers;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Tunables of a [`Connector`](crate::connector::Connector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// How long discovery waits for a gateway to answer the handshake.
    pub discovery_timeout: Duration,
    /// How long an acknowledged operation waits for its delivery status.
    pub delivery_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(10),
            delivery_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }
}

/// Options for a single publication.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Ask the broker to retain the message for late subscribers.
    pub retain: bool,
    /// Topic on which replies are expected.
    pub reply_to: Option<String>,
    /// Application headers. Reserved headers are overwritten by the broker.
    pub headers: Headers,
}

impl PublishOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, topic: impl Into<String>) -> Self {
        self.reply_to = Some(topic.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_ten_seconds() {
        let config = ConnectorConfig::default();
        assert_eq!(config.discovery_timeout, Duration::from_secs(10));
        assert_eq!(config.delivery_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builders_override_fields() {
        let config = ConnectorConfig::new()
            .with_discovery_timeout(Duration::from_millis(50))
            .with_delivery_timeout(Duration::from_millis(75));
        assert_eq!(config.discovery_timeout, Duration::from_millis(50));
        assert_eq!(config.delivery_timeout, Duration::from_millis(75));

        let options = PublishOptions::new()
            .with_retain(true)
            .with_reply_to("reply/1")
            .with_header("priority", 2);
        assert!(options.retain);
        assert_eq!(options.reply_to.as_deref(), Some("reply/1"));
        assert_eq!(options.headers["priority"], 2);
    }
}
