//! Topic subscriptions and dispatch-target resolution.

use crate::message::{ClientId, SubscriberId};
use crate::topic::{TopicParams, TopicPattern};
use std::collections::{HashMap, HashSet};

/// One registered subscription.
#[derive(Debug, Clone)]
pub struct TopicSubscription {
    pub pattern: TopicPattern,
    pub client_id: ClientId,
    pub subscriber_id: SubscriberId,
}

/// A dispatch target resolved for one concrete topic: the subscription to
/// tag the copy with, and the capture values its pattern produced.
#[derive(Debug, Clone)]
pub struct Destination {
    pub client_id: ClientId,
    pub subscriber_id: SubscriberId,
    pub params: TopicParams,
}

/// All live subscriptions, keyed by subscriber id with a per-client index
/// for cascading removal.
#[derive(Debug, Default)]
pub struct TopicSubscriptionRegistry {
    subscriptions: HashMap<SubscriberId, TopicSubscription>,
    by_client: HashMap<ClientId, HashSet<SubscriberId>>,
}

impl TopicSubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription. Returns `false` when the subscriber id is
    /// already taken; subscriber ids are unique across the broker.
    pub fn subscribe(
        &mut self,
        pattern: TopicPattern,
        client_id: ClientId,
        subscriber_id: SubscriberId,
    ) -> bool {
        if self.subscriptions.contains_key(&subscriber_id) {
            return false;
        }
        self.subscriptions.insert(
            subscriber_id,
            TopicSubscription {
                pattern,
                client_id,
                subscriber_id,
            },
        );
        self.by_client
            .entry(client_id)
            .or_default()
            .insert(subscriber_id);
        true
    }

    /// Removes every subscription of `client_id` registered under exactly
    /// this pattern string. Returns how many were removed.
    pub fn unsubscribe(&mut self, pattern: &str, client_id: ClientId) -> usize {
        let matching: Vec<SubscriberId> = self
            .by_client
            .get(&client_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.subscriptions
                            .get(id)
                            .is_some_and(|sub| sub.pattern.as_str() == pattern)
                    })
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        for subscriber_id in &matching {
            self.remove(*subscriber_id);
        }
        matching.len()
    }

    /// Removes one subscription, but only if `client_id` owns it.
    pub fn unsubscribe_subscriber(
        &mut self,
        subscriber_id: SubscriberId,
        client_id: ClientId,
    ) -> bool {
        let owned = self
            .subscriptions
            .get(&subscriber_id)
            .is_some_and(|sub| sub.client_id == client_id);
        if owned {
            self.remove(subscriber_id);
        }
        owned
    }

    /// Removes every subscription of a client. Returns how many were
    /// removed.
    pub fn unsubscribe_client(&mut self, client_id: ClientId) -> usize {
        let Some(ids) = self.by_client.remove(&client_id) else {
            return 0;
        };
        let removed = ids.len();
        for subscriber_id in ids {
            self.subscriptions.remove(&subscriber_id);
        }
        removed
    }

    fn remove(&mut self, subscriber_id: SubscriberId) {
        if let Some(subscription) = self.subscriptions.remove(&subscriber_id) {
            if let Some(ids) = self.by_client.get_mut(&subscription.client_id) {
                ids.remove(&subscriber_id);
                if ids.is_empty() {
                    self.by_client.remove(&subscription.client_id);
                }
            }
        }
    }

    /// Resolves the dispatch targets of a concrete topic. Every matching
    /// subscription yields exactly one destination, even when several belong
    /// to the same client.
    #[must_use]
    pub fn resolve(&self, topic: &str) -> Vec<Destination> {
        self.subscriptions
            .values()
            .filter_map(|subscription| {
                subscription
                    .pattern
                    .capture(topic)
                    .map(|params| Destination {
                        client_id: subscription.client_id,
                        subscriber_id: subscription.subscriber_id,
                        params,
                    })
            })
            .collect()
    }

    /// Number of subscriptions whose pattern matches `topic`.
    #[must_use]
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.subscriptions
            .values()
            .filter(|subscription| subscription.pattern.matches(topic))
            .count()
    }

    #[must_use]
    pub fn get(&self, subscriber_id: SubscriberId) -> Option<&TopicSubscription> {
        self.subscriptions.get(&subscriber_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
