//! Messages exchanged through the broker, and their identifiers.

use crate::intent::{Capability, Intent};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Reserved topic answering subscriber-count observation requests.
///
/// Publish the observed topic as the request body with a reply-to topic set;
/// the broker answers with the current count and keeps re-publishing it on
/// every change until the reply-to subscription is gone.
pub const SUBSCRIBER_COUNT_TOPIC: &str = "$broker/subscriber-count";

/// Header names the broker owns.
///
/// These are stamped onto every message after the interceptor chain has run,
/// overwriting whatever the publisher supplied.
pub mod headers {
    /// Id of the envelope that carried the message, as a string.
    pub const MESSAGE_ID: &str = "message-id";
    /// Symbolic name of the publishing application.
    pub const APP_SYMBOLIC_NAME: &str = "app-symbolic-name";
    /// Id of the publishing client, as a string.
    pub const CLIENT_ID: &str = "client-id";
    /// Broker ingestion time in milliseconds, strictly increasing per broker.
    pub const TIMESTAMP: &str = "timestamp";
    /// Target subscription of a dispatched copy. Stamped per copy on
    /// dispatch; a publisher cannot spoof it.
    pub const SUBSCRIBER_ID: &str = "subscriber-id";
}

/// Message headers: JSON values keyed by name.
pub type Headers = HashMap<String, Value>;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id! {
    /// Unique id of one envelope. Doubles as the correlation key for its
    /// delivery status: the broker reports the status on a topic equal to
    /// the id rendered as a string.
    MessageId
}

uuid_id! {
    /// Identity of one connected client, assigned by the broker on connect.
    ClientId
}

uuid_id! {
    /// Identity of one topic subscription, assigned by the subscriber.
    SubscriberId
}

/// A message published to a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    /// Concrete destination topic. Never contains capture segments.
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Bytes>,
    #[serde(default)]
    pub headers: Headers,
    /// Capture values of the matched subscription pattern. Empty on publish;
    /// filled in per dispatched copy.
    #[serde(default)]
    pub params: HashMap<String, String>,
    /// Topic on which the publisher awaits replies, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Whether the broker retains this message for late subscribers.
    #[serde(default)]
    pub retain: bool,
}

impl TopicMessage {
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            body: None,
            headers: Headers::new(),
            params: HashMap::new(),
            reply_to: None,
            retain: false,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, topic: impl Into<String>) -> Self {
        self.reply_to = Some(topic.into());
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Broker ingestion timestamp, if the message passed through a broker.
    #[must_use]
    pub fn timestamp(&self) -> Option<u64> {
        self.headers.get(headers::TIMESTAMP).and_then(Value::as_u64)
    }

    /// Target subscription of this copy, if it was dispatched to one.
    #[must_use]
    pub fn subscriber_id(&self) -> Option<SubscriberId> {
        self.headers
            .get(headers::SUBSCRIBER_ID)
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
    }

    /// Body bytes, or an empty slice when absent.
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }
}

/// An intent on its way to the clients of providing applications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMessage {
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Bytes>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// The capability this copy was dispatched for. Absent on publish;
    /// stamped by the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
}

impl IntentMessage {
    #[must_use]
    pub fn new(intent: Intent) -> Self {
        Self {
            intent,
            body: None,
            headers: Headers::new(),
            reply_to: None,
            capability: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_reply_to(mut self, topic: impl Into<String>) -> Self {
        self.reply_to = Some(topic.into());
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Body bytes, or an empty slice when absent.
    #[must_use]
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or_default()
    }
}

/// Outcome of one acknowledged operation, reported on the topic equal to the
/// originating message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl DeliveryStatus {
    #[must_use]
    pub fn success() -> Self {
        Self {
            ok: true,
            details: None,
        }
    }

    #[must_use]
    pub fn failure(details: impl Into<String>) -> Self {
        Self {
            ok: false,
            details: Some(details.into()),
        }
    }

    /// Encodes the status as a message body.
    ///
    /// # Panics
    ///
    /// Never in practice; the type serializes infallibly.
    #[must_use]
    pub fn to_body(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).expect("status serializes infallibly"))
    }

    /// Decodes a status from a message body.
    #[must_use]
    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_render_and_parse_as_uuids() {
        let id = MessageId::new();
        let parsed: MessageId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_ne!(MessageId::new(), MessageId::new());
    }

    #[test]
    fn topic_message_builders() {
        let message = TopicMessage::new("order/42")
            .with_body("hello")
            .with_header("priority", 3)
            .with_reply_to("reply/abc")
            .with_retain(true);
        assert_eq!(message.topic, "order/42");
        assert_eq!(message.body_bytes(), b"hello");
        assert_eq!(message.headers["priority"], 3);
        assert_eq!(message.reply_to.as_deref(), Some("reply/abc"));
        assert!(message.retain);
    }

    #[test]
    fn reserved_header_accessors() {
        let mut message = TopicMessage::new("a");
        assert_eq!(message.timestamp(), None);
        assert_eq!(message.subscriber_id(), None);

        let subscriber = SubscriberId::new();
        message.set_header(headers::TIMESTAMP, 17_u64);
        message.set_header(headers::SUBSCRIBER_ID, subscriber.to_string());
        assert_eq!(message.timestamp(), Some(17));
        assert_eq!(message.subscriber_id(), Some(subscriber));
    }

    #[test]
    fn topic_message_serde_field_names() {
        let message = TopicMessage::new("order/42").with_reply_to("reply/abc");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["topic"], "order/42");
        assert_eq!(json["replyTo"], "reply/abc");
        assert!(json.get("body").is_none());
        assert_eq!(json["retain"], false);
    }

    #[test]
    fn delivery_status_round_trips_through_a_body() {
        let status = DeliveryStatus::failure("not qualified");
        let body = status.to_body();
        assert_eq!(DeliveryStatus::from_body(&body), Some(status));
        assert_eq!(DeliveryStatus::from_body(b"not json"), None);
    }

    #[test]
    fn success_status_has_no_details() {
        let status = DeliveryStatus::success();
        assert!(status.ok);
        assert!(status.details.is_none());
    }
}
