//! The wire envelope exchanged across the context boundary.
//!
//! Every transmission is one [`Envelope`]: a message id, a direction tag,
//! and a channel-classified payload. Payloads are typed here and decoded
//! exactly once at the boundary; everything past the boundary works with the
//! decoded types.
//!
//! Broker replies that correlate to a specific request (connect
//! acknowledgments, delivery statuses, request replies, subscriber counts)
//! are ordinary [`Channel::Topic`] envelopes whose topic is the correlation
//! key, so the channel set stays closed.

use crate::message::{ClientId, IntentMessage, MessageId, SubscriberId, TopicMessage};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    ClientToBroker,
    BrokerToClient,
}

/// Connect request payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Symbolic name of the connecting application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

impl ConnectRequest {
    #[must_use]
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: Some(app.into()),
        }
    }
}

/// Topic subscription request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub pattern: String,
    pub subscriber_id: SubscriberId,
}

/// Topic unsubscription request payload. Targets one subscription, so
/// sibling subscriptions of the same client stay untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscriptionRequest {
    pub subscriber_id: SubscriberId,
}

/// Channel classification plus the payload it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "message", rename_all = "kebab-case")]
pub enum Channel {
    Connect(ConnectRequest),
    Disconnect,
    Topic(TopicMessage),
    TopicSubscribe(SubscriptionRequest),
    TopicUnsubscribe(UnsubscriptionRequest),
    Intent(IntentMessage),
}

impl Channel {
    /// Wire tag of the channel, for logging.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect => "disconnect",
            Self::Topic(_) => "topic",
            Self::TopicSubscribe(_) => "topic-subscribe",
            Self::TopicUnsubscribe(_) => "topic-unsubscribe",
            Self::Intent(_) => "intent",
        }
    }
}

/// One transmission across the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub message_id: MessageId,
    pub transport: Direction,
    #[serde(flatten)]
    pub channel: Channel,
}

impl Envelope {
    #[must_use]
    pub fn client_to_broker(channel: Channel) -> Self {
        Self {
            message_id: MessageId::new(),
            transport: Direction::ClientToBroker,
            channel,
        }
    }

    #[must_use]
    pub fn broker_to_client(channel: Channel) -> Self {
        Self {
            message_id: MessageId::new(),
            transport: Direction::BrokerToClient,
            channel,
        }
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = message_id;
        self
    }
}

/// Outcome code of a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnackCode {
    #[serde(rename = "accepted")]
    Accepted,
    /// Malformed request, for example a missing application name.
    #[serde(rename = "refused:bad-request")]
    BadRequest,
    /// The application is not registered.
    #[serde(rename = "refused:rejected")]
    Rejected,
    /// The asserted origin does not match the registered origin.
    #[serde(rename = "refused:blocked")]
    Blocked,
}

impl fmt::Display for ConnackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Accepted => "accepted",
            Self::BadRequest => "refused:bad-request",
            Self::Rejected => "refused:rejected",
            Self::Blocked => "refused:blocked",
        })
    }
}

/// Connect acknowledgment, delivered as the body of a topic envelope whose
/// topic equals the connect request's message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnackReply {
    pub status: ConnackCode,
    /// Assigned client id; present exactly when the connect was accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ConnackReply {
    #[must_use]
    pub fn accepted(client_id: ClientId) -> Self {
        Self {
            status: ConnackCode::Accepted,
            client_id: Some(client_id),
            details: None,
        }
    }

    #[must_use]
    pub fn refused(status: ConnackCode, details: impl Into<String>) -> Self {
        Self {
            status,
            client_id: None,
            details: Some(details.into()),
        }
    }

    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == ConnackCode::Accepted
    }

    /// Encodes the acknowledgment as a message body.
    ///
    /// # Panics
    ///
    /// Never in practice; the type serializes infallibly.
    #[must_use]
    pub fn to_body(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).expect("connack serializes infallibly"))
    }

    /// Decodes an acknowledgment from a message body.
    #[must_use]
    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }
}
