//! Consumer-side streams: subscriptions, replies, counts, and intents.

use crate::connector::client::Shared;
use crate::message::{IntentMessage, SubscriberId, TopicMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// A live topic subscription.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    shared: Arc<Shared>,
    subscriber_id: SubscriberId,
    pattern: String,
    receiver: mpsc::UnboundedReceiver<TopicMessage>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber_id", &self.subscriber_id)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(super) fn new(
        shared: Arc<Shared>,
        subscriber_id: SubscriberId,
        pattern: String,
        receiver: mpsc::UnboundedReceiver<TopicMessage>,
    ) -> Self {
        Self {
            shared,
            subscriber_id,
            pattern,
            receiver,
        }
    }

    /// The next matching message, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<TopicMessage> {
        self.receiver.recv().await
    }

    #[must_use]
    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.remove_subscription(self.subscriber_id);
    }
}

/// Replies to one request, arriving on its private reply topic.
///
/// Dropping it ends the conversation.
pub struct ReplyStream {
    subscription: Subscription,
}

impl std::fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream")
            .field("subscriber_id", &self.subscription.subscriber_id)
            .field("pattern", &self.subscription.pattern)
            .finish_non_exhaustive()
    }
}

impl ReplyStream {
    pub(super) fn new(subscription: Subscription) -> Self {
        Self { subscription }
    }

    /// The next reply, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<TopicMessage> {
        self.subscription.recv().await
    }

    /// The private topic replies are addressed to.
    #[must_use]
    pub fn reply_topic(&self) -> &str {
        self.subscription.pattern()
    }
}

/// Subscriber counts for one observed topic: the current value first, then
/// every change. Dropping it ends the observation.
pub struct CountStream {
    replies: ReplyStream,
}

impl CountStream {
    pub(super) fn new(replies: ReplyStream) -> Self {
        Self { replies }
    }

    /// The next count, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<usize> {
        loop {
            let message = self.replies.recv().await?;
            let parsed = std::str::from_utf8(message.body_bytes())
                .ok()
                .and_then(|text| text.parse().ok());
            match parsed {
                Some(count) => return Some(count),
                None => trace!(topic = %message.topic, "unparseable count discarded"),
            }
        }
    }
}

/// Intents routed to this application's capabilities.
pub struct IntentStream {
    receiver: mpsc::UnboundedReceiver<IntentMessage>,
}

impl IntentStream {
    pub(super) fn new(receiver: mpsc::UnboundedReceiver<IntentMessage>) -> Self {
        Self { receiver }
    }

    /// The next intent, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<IntentMessage> {
        self.receiver.recv().await
    }
}
