//! Topic matching with named single-segment captures.
//!
//! Topics are `/`-separated strings. A pattern segment starting with `:`
//! captures exactly one non-empty topic segment under that name, so
//! `order/:id/status` matches `order/42/status` with `id = "42"`. There is
//! no multi-level wildcard: a pattern only ever matches topics with the
//! same number of segments.

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Marker introducing a capture segment in a pattern.
pub const CAPTURE_MARKER: char = ':';

/// Captured segment values of one match, keyed by capture name.
pub type TopicParams = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
}

/// A parsed topic pattern.
///
/// Parsing validates the pattern once; matching and capturing are then
/// allocation-free walks over the parsed segments.
///
/// # Examples
///
/// ```
/// use mullion::topic::TopicPattern;
///
/// let pattern = TopicPattern::parse("order/:id/status")?;
/// assert!(pattern.matches("order/42/status"));
/// assert!(!pattern.matches("order/42"));
///
/// let params = pattern.capture("order/42/status").unwrap();
/// assert_eq!(params["id"], "42");
/// # Ok::<(), mullion::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
    capture_count: usize,
}

impl TopicPattern {
    /// Parses a pattern string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if the pattern is empty, a capture
    /// segment has no name, or two capture segments share a name.
    pub fn parse(pattern: impl Into<String>) -> Result<Self> {
        let raw = pattern.into();
        if raw.is_empty() {
            return Err(Error::InvalidPattern("pattern must not be empty".to_string()));
        }

        let mut segments = Vec::new();
        let mut names = HashSet::new();
        for part in raw.split('/') {
            if let Some(name) = part.strip_prefix(CAPTURE_MARKER) {
                if name.is_empty() {
                    return Err(Error::InvalidPattern(format!(
                        "capture segment in '{raw}' is missing a name"
                    )));
                }
                if !names.insert(name.to_string()) {
                    return Err(Error::InvalidPattern(format!(
                        "duplicate capture name ':{name}' in '{raw}'"
                    )));
                }
                segments.push(Segment::Capture(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        let capture_count = names.len();
        Ok(Self {
            raw,
            segments,
            capture_count,
        })
    }

    /// The pattern exactly as it was parsed.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Whether the pattern contains at least one capture segment.
    #[must_use]
    pub fn has_captures(&self) -> bool {
        self.capture_count > 0
    }

    /// Whether the pattern names a single concrete topic.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.capture_count == 0
    }

    /// Tests `topic` against the pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        // Fast path for exact patterns.
        if self.is_exact() {
            return self.raw == topic;
        }
        let mut parts = topic.split('/');
        for segment in &self.segments {
            let Some(part) = parts.next() else {
                return false;
            };
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return false;
                    }
                }
                Segment::Capture(_) => {
                    if part.is_empty() {
                        return false;
                    }
                }
            }
        }
        parts.next().is_none()
    }

    /// Matches `topic` and collects capture values.
    ///
    /// Returns `None` if the topic does not match. For exact patterns a
    /// successful match yields an empty map.
    #[must_use]
    pub fn capture(&self, topic: &str) -> Option<TopicParams> {
        if self.is_exact() {
            return (self.raw == topic).then(TopicParams::new);
        }
        let mut params = TopicParams::with_capacity(self.capture_count);
        let mut parts = topic.split('/');
        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Capture(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for TopicPattern {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

/// Checks whether `topic` is a publishable concrete topic: non-empty and
/// free of capture markers.
#[must_use]
pub fn is_valid_topic(topic: &str) -> bool {
    !topic.is_empty() && !topic.split('/').any(|part| part.starts_with(CAPTURE_MARKER))
}

/// Validates a concrete topic for publishing.
///
/// # Errors
///
/// Returns [`Error::InvalidTopic`] if the topic is empty or contains a
/// capture segment.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::InvalidTopic("topic must not be empty".to_string()));
    }
    if topic.split('/').any(|part| part.starts_with(CAPTURE_MARKER)) {
        return Err(Error::InvalidTopic(format!(
            "'{topic}' contains a capture segment; captures are only valid in subscription patterns"
        )));
    }
    Ok(())
}
