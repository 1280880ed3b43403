//! Intent, capability, and intention model.
//!
//! Applications declare *capabilities* (things they can do) and *intentions*
//! (things they want done by others). A published [`Intent`] is routed to the
//! connected clients of every application whose capability matches it. The
//! declared side of a match is a [`Qualifier`]: a map whose values are either
//! literals or the placeholders `*` (any value) and `?` (optional entry).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Reserved qualifier key permitting asserted entries the qualifier does not
/// declare.
pub const WILDCARD_KEY: &str = "*";

/// Declared qualifier value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QualifierValue {
    /// Matches exactly this value.
    Literal(String),
    /// The `*` placeholder: the entry must be present, any value accepted.
    AnyValue,
    /// The `?` placeholder: the entry may be present with any value, or absent.
    OptionalPresence,
}

impl From<String> for QualifierValue {
    fn from(value: String) -> Self {
        match value.as_str() {
            "*" => Self::AnyValue,
            "?" => Self::OptionalPresence,
            _ => Self::Literal(value),
        }
    }
}

impl From<&str> for QualifierValue {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<QualifierValue> for String {
    fn from(value: QualifierValue) -> Self {
        match value {
            QualifierValue::Literal(literal) => literal,
            QualifierValue::AnyValue => "*".to_string(),
            QualifierValue::OptionalPresence => "?".to_string(),
        }
    }
}

/// Declared qualifier of a capability or intention.
///
/// Matching an asserted qualifier (the plain string map carried by an
/// [`Intent`]) follows these rules:
///
/// - a [`QualifierValue::Literal`] entry requires the same key with the
///   exact same value,
/// - a [`QualifierValue::AnyValue`] entry requires the key to be present,
/// - a [`QualifierValue::OptionalPresence`] entry never fails a match,
/// - asserted keys the qualifier does not declare fail the match unless the
///   qualifier carries the reserved [`WILDCARD_KEY`] entry.
///
/// An empty qualifier therefore matches only an empty asserted qualifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qualifier(BTreeMap<String, QualifierValue>);

impl Qualifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<QualifierValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Adds the reserved `*` key, permitting undeclared asserted entries.
    #[must_use]
    pub fn with_any_additional(self) -> Self {
        self.with(WILDCARD_KEY, QualifierValue::AnyValue)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<QualifierValue>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &QualifierValue)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Whether the reserved `*` key is declared.
    #[must_use]
    pub fn accepts_additional_entries(&self) -> bool {
        self.0.contains_key(WILDCARD_KEY)
    }

    /// Tests an asserted qualifier against this declared qualifier.
    #[must_use]
    pub fn matches(&self, asserted: &HashMap<String, String>) -> bool {
        for (key, value) in &self.0 {
            if key == WILDCARD_KEY {
                continue;
            }
            match (value, asserted.get(key)) {
                (QualifierValue::Literal(expected), Some(actual)) if expected == actual => {}
                (QualifierValue::AnyValue, Some(_)) => {}
                (QualifierValue::OptionalPresence, _) => {}
                _ => return false,
            }
        }
        if !self.accepts_additional_entries() {
            for key in asserted.keys() {
                if !self.0.contains_key(key) {
                    return false;
                }
            }
        }
        true
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (key, value)) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={}", String::from(value.clone()))?;
        }
        f.write_str("}")
    }
}

/// What a publisher asserts: the intent type plus exact qualifier entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub qualifier: HashMap<String, String>,
}

impl Intent {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            qualifier: HashMap::new(),
        }
    }

    /// Adds a qualifier entry, builder style.
    #[must_use]
    pub fn with_qualifier(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.qualifier.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.kind)
    }
}

/// Visibility of a declared capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to every application.
    Public,
    /// Visible only to the owning application, and to applications whose
    /// scope check is disabled.
    #[default]
    Private,
}

/// Identifier assigned to a capability when its declaration is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityId(Uuid);

impl CapabilityId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CapabilityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A registered capability: a declaration bound to its owning application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub id: CapabilityId,
    /// Symbolic name of the providing application.
    pub application: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub qualifier: Qualifier,
    #[serde(default)]
    pub visibility: Visibility,
}

impl Capability {
    /// Whether this capability satisfies `intent`, ignoring visibility.
    #[must_use]
    pub fn matches(&self, intent: &Intent) -> bool {
        self.kind == intent.kind && self.qualifier.matches(&intent.qualifier)
    }
}

/// A declared intention: permission to publish matching intents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intention {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub qualifier: Qualifier,
}

impl Intention {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            qualifier: Qualifier::new(),
        }
    }

    #[must_use]
    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = qualifier;
        self
    }

    /// Whether this intention covers `intent`.
    #[must_use]
    pub fn matches(&self, intent: &Intent) -> bool {
        self.kind == intent.kind && self.qualifier.matches(&intent.qualifier)
    }
}
