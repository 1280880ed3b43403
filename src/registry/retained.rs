//! Retained message storage.
//!
//! At most one message is retained per exact topic: the latest one. A
//! retained publish without a body deletes the entry for its topic instead
//! of being dispatched.

use crate::message::TopicMessage;
use crate::topic::TopicPattern;
use std::collections::HashMap;

/// What [`RetainedMessageStore::persist_or_delete`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainOutcome {
    Persisted,
    Deleted,
}

#[derive(Debug, Default)]
pub struct RetainedMessageStore {
    by_topic: HashMap<String, TopicMessage>,
}

impl RetainedMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `message` under its exact topic, replacing any previous entry.
    /// A message without a body deletes the entry instead.
    pub fn persist_or_delete(&mut self, message: TopicMessage) -> RetainOutcome {
        if message.body.is_none() {
            self.by_topic.remove(&message.topic);
            RetainOutcome::Deleted
        } else {
            self.by_topic.insert(message.topic.clone(), message);
            RetainOutcome::Persisted
        }
    }

    /// The retained message a new subscription to `pattern` should replay.
    ///
    /// For an exact pattern this is the entry under that topic. For a
    /// pattern with captures it is the matching entry with the greatest
    /// broker timestamp; the winner among equal timestamps is unspecified
    /// but stable while the store is unmodified.
    #[must_use]
    pub fn find_most_recent(&self, pattern: &TopicPattern) -> Option<&TopicMessage> {
        if pattern.is_exact() {
            return self.by_topic.get(pattern.as_str());
        }
        let mut best: Option<&TopicMessage> = None;
        for (topic, message) in &self.by_topic {
            if !pattern.matches(topic) {
                continue;
            }
            let timestamp = message.timestamp().unwrap_or(0);
            if best.map_or(true, |current| timestamp > current.timestamp().unwrap_or(0)) {
                best = Some(message);
            }
        }
        best
    }

    #[must_use]
    pub fn get(&self, topic: &str) -> Option<&TopicMessage> {
        self.by_topic.get(topic)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_topic.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_topic.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::headers;

    fn pattern(s: &str) -> TopicPattern {
        TopicPattern::parse(s).unwrap()
    }

    fn retained(topic: &str, body: &'static str, timestamp: u64) -> TopicMessage {
        let mut message = TopicMessage::new(topic).with_body(body).with_retain(true);
        message.set_header(headers::TIMESTAMP, timestamp);
        message
    }

    #[test]
    fn stores_the_latest_message_per_topic() {
        let mut store = RetainedMessageStore::new();
        store.persist_or_delete(retained("sensor/kitchen", "20C", 1));
        store.persist_or_delete(retained("sensor/kitchen", "21C", 2));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("sensor/kitchen").unwrap().body_bytes(), b"21C");
    }

    #[test]
    fn bodyless_retained_message_deletes_the_entry() {
        let mut store = RetainedMessageStore::new();
        assert_eq!(
            store.persist_or_delete(retained("sensor/kitchen", "20C", 1)),
            RetainOutcome::Persisted
        );

        let delete = TopicMessage::new("sensor/kitchen").with_retain(true);
        assert_eq!(store.persist_or_delete(delete), RetainOutcome::Deleted);
        assert!(store.is_empty());

        // deleting an absent entry is a no-op
        let delete = TopicMessage::new("sensor/kitchen").with_retain(true);
        assert_eq!(store.persist_or_delete(delete), RetainOutcome::Deleted);
    }

    #[test]
    fn exact_pattern_returns_the_entry_under_that_topic() {
        let mut store = RetainedMessageStore::new();
        store.persist_or_delete(retained("sensor/kitchen", "20C", 5));
        store.persist_or_delete(retained("sensor/cellar", "12C", 9));

        let found = store.find_most_recent(&pattern("sensor/kitchen")).unwrap();
        assert_eq!(found.body_bytes(), b"20C");
        assert!(store.find_most_recent(&pattern("sensor/attic")).is_none());
    }

    #[test]
    fn capture_pattern_returns_the_most_recent_match() {
        let mut store = RetainedMessageStore::new();
        store.persist_or_delete(retained("sensor/kitchen", "20C", 5));
        store.persist_or_delete(retained("sensor/cellar", "12C", 9));
        store.persist_or_delete(retained("door/front", "closed", 30));

        let found = store.find_most_recent(&pattern("sensor/:room")).unwrap();
        assert_eq!(found.topic, "sensor/cellar");
    }

    #[test]
    fn timestamp_ties_resolve_stably() {
        let mut store = RetainedMessageStore::new();
        store.persist_or_delete(retained("sensor/kitchen", "20C", 7));
        store.persist_or_delete(retained("sensor/cellar", "12C", 7));

        let first = store
            .find_most_recent(&pattern("sensor/:room"))
            .unwrap()
            .topic
            .clone();
        for _ in 0..10 {
            let again = store.find_most_recent(&pattern("sensor/:room")).unwrap();
            assert_eq!(again.topic, first);
        }
    }

    #[test]
    fn messages_without_a_timestamp_rank_lowest() {
        let mut store = RetainedMessageStore::new();
        store.persist_or_delete(TopicMessage::new("sensor/attic").with_body("?"));
        store.persist_or_delete(retained("sensor/kitchen", "20C", 1));

        let found = store.find_most_recent(&pattern("sensor/:room")).unwrap();
        assert_eq!(found.topic, "sensor/kitchen");
    }
}
