//! The application directory: which applications exist, what they provide,
//! and what they are allowed to ask for.
//!
//! The directory is an external collaborator of the broker. Deployments
//! typically load it from a registry file at startup; tests build it from
//! descriptors inline. The broker only consumes the [`ApplicationDirectory`]
//! trait.

use crate::error::{Error, Result};
use crate::intent::{Capability, CapabilityId, Intent, Intention, Qualifier, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Identity and scoping flags of a registered application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub symbolic_name: String,
    /// Origin connects from this application must assert.
    pub origin: String,
    /// When disabled, private capabilities of other applications become
    /// visible to this application.
    pub scope_check: bool,
    /// When disabled, this application may publish intents without a
    /// matching declared intention.
    pub intention_check: bool,
}

/// Declaration of one capability, before it is bound to an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDeclaration {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub qualifier: Qualifier,
    #[serde(default)]
    pub visibility: Visibility,
}

impl CapabilityDeclaration {
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            qualifier: Qualifier::new(),
            visibility: Visibility::default(),
        }
    }

    #[must_use]
    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = qualifier;
        self
    }

    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

/// Everything an application registers with: identity, flags, capabilities,
/// intentions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDescriptor {
    pub symbolic_name: String,
    pub origin: String,
    #[serde(default = "default_check")]
    pub scope_check: bool,
    #[serde(default = "default_check")]
    pub intention_check: bool,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDeclaration>,
    #[serde(default)]
    pub intentions: Vec<Intention>,
}

fn default_check() -> bool {
    true
}

impl ApplicationDescriptor {
    #[must_use]
    pub fn new(symbolic_name: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            origin: origin.into(),
            scope_check: true,
            intention_check: true,
            capabilities: Vec::new(),
            intentions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_capability(mut self, capability: CapabilityDeclaration) -> Self {
        self.capabilities.push(capability);
        self
    }

    #[must_use]
    pub fn with_intention(mut self, intention: Intention) -> Self {
        self.intentions.push(intention);
        self
    }

    #[must_use]
    pub fn with_scope_check(mut self, enabled: bool) -> Self {
        self.scope_check = enabled;
        self
    }

    #[must_use]
    pub fn with_intention_check(mut self, enabled: bool) -> Self {
        self.intention_check = enabled;
        self
    }
}

/// Lookup interface the broker consumes.
pub trait ApplicationDirectory: Send + Sync {
    /// Application by symbolic name.
    fn application(&self, symbolic_name: &str) -> Option<Arc<Application>>;

    /// Whether `symbolic_name` declared an intention covering `intent`.
    fn intention_declared(&self, symbolic_name: &str, intent: &Intent) -> bool;

    /// Capabilities matching `intent` that are visible to `requester`.
    ///
    /// A capability is visible if it is public, owned by the requester, or
    /// the requester's scope check is disabled.
    fn matching_capabilities(&self, intent: &Intent, requester: &Application) -> Vec<Capability>;
}

fn visible_to(capability: &Capability, requester: &Application) -> bool {
    capability.visibility == Visibility::Public
        || capability.application == requester.symbolic_name
        || !requester.scope_check
}

/// Directory built once from descriptors and immutable afterwards.
#[derive(Debug, Default)]
pub struct StaticApplicationDirectory {
    applications: HashMap<String, Arc<Application>>,
    capabilities: Vec<Capability>,
    intentions: HashMap<String, Vec<Intention>>,
}

impl StaticApplicationDirectory {
    /// Builds the directory, assigning an id to every declared capability.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidApplication`] on an empty symbolic name or
    /// origin, or when two descriptors share a symbolic name.
    pub fn new(descriptors: Vec<ApplicationDescriptor>) -> Result<Self> {
        let mut directory = Self::default();
        for descriptor in descriptors {
            if descriptor.symbolic_name.is_empty() {
                return Err(Error::InvalidApplication(
                    "symbolic name must not be empty".to_string(),
                ));
            }
            if descriptor.origin.is_empty() {
                return Err(Error::InvalidApplication(format!(
                    "application '{}' declares an empty origin",
                    descriptor.symbolic_name
                )));
            }
            if directory
                .applications
                .contains_key(&descriptor.symbolic_name)
            {
                return Err(Error::InvalidApplication(format!(
                    "application '{}' is registered more than once",
                    descriptor.symbolic_name
                )));
            }

            let application = Arc::new(Application {
                symbolic_name: descriptor.symbolic_name.clone(),
                origin: descriptor.origin,
                scope_check: descriptor.scope_check,
                intention_check: descriptor.intention_check,
            });
            for declaration in descriptor.capabilities {
                directory.capabilities.push(Capability {
                    id: CapabilityId::new(),
                    application: descriptor.symbolic_name.clone(),
                    kind: declaration.kind,
                    qualifier: declaration.qualifier,
                    visibility: declaration.visibility,
                });
            }
            directory
                .intentions
                .insert(descriptor.symbolic_name.clone(), descriptor.intentions);
            directory
                .applications
                .insert(descriptor.symbolic_name, application);
        }
        Ok(directory)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.applications.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }
}

impl ApplicationDirectory for StaticApplicationDirectory {
    fn application(&self, symbolic_name: &str) -> Option<Arc<Application>> {
        self.applications.get(symbolic_name).cloned()
    }

    fn intention_declared(&self, symbolic_name: &str, intent: &Intent) -> bool {
        self.intentions
            .get(symbolic_name)
            .is_some_and(|intentions| intentions.iter().any(|intention| intention.matches(intent)))
    }

    fn matching_capabilities(&self, intent: &Intent, requester: &Application) -> Vec<Capability> {
        self.capabilities
            .iter()
            .filter(|capability| capability.matches(intent))
            .filter(|capability| visible_to(capability, requester))
            .cloned()
            .collect()
    }
}
