//! Connected clients and the channel invariant.

use crate::message::ClientId;
use crate::registry::application::Application;
use crate::transport::{ContextPort, EndpointId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One live connection of a registered application.
#[derive(Clone)]
pub struct ConnectedClient {
    pub id: ClientId,
    pub application: Arc<Application>,
    pub port: Arc<dyn ContextPort>,
}

impl ConnectedClient {
    /// Admits a connection, assigning a fresh client id.
    #[must_use]
    pub fn new(application: Arc<Application>, port: Arc<dyn ContextPort>) -> Self {
        Self {
            id: ClientId::new(),
            application,
            port,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> EndpointId {
        self.port.endpoint()
    }
}

impl fmt::Debug for ConnectedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedClient")
            .field("id", &self.id)
            .field("application", &self.application.symbolic_name)
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

/// Registry of currently connected clients, indexed by id and by the
/// endpoint they connected through.
///
/// The endpoint index is the channel invariant: inbound traffic is only
/// attributed to a client when it arrives through the port that client
/// connected with.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    by_id: HashMap<ClientId, ConnectedClient>,
    by_endpoint: HashMap<EndpointId, ClientId>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client. A client previously connected through the same
    /// endpoint is displaced and returned so the caller can cascade its
    /// state.
    pub fn register(&mut self, client: ConnectedClient) -> Option<ConnectedClient> {
        let endpoint = client.endpoint();
        let displaced = self
            .by_endpoint
            .get(&endpoint)
            .copied()
            .and_then(|previous| self.by_id.remove(&previous));
        self.by_endpoint.insert(endpoint, client.id);
        self.by_id.insert(client.id, client);
        displaced
    }

    /// Removes a client, returning it if it was registered.
    pub fn unregister(&mut self, id: ClientId) -> Option<ConnectedClient> {
        let client = self.by_id.remove(&id)?;
        let endpoint = client.endpoint();
        // The endpoint index may already point at a replacement.
        if self.by_endpoint.get(&endpoint) == Some(&id) {
            self.by_endpoint.remove(&endpoint);
        }
        Some(client)
    }

    #[must_use]
    pub fn lookup_by_id(&self, id: ClientId) -> Option<&ConnectedClient> {
        self.by_id.get(&id)
    }

    /// Client connected through `endpoint`, if any.
    #[must_use]
    pub fn lookup_by_channel(&self, endpoint: EndpointId) -> Option<&ConnectedClient> {
        self.by_endpoint
            .get(&endpoint)
            .and_then(|id| self.by_id.get(id))
    }

    /// All connected clients of one application.
    #[must_use]
    pub fn list_by_application(&self, symbolic_name: &str) -> Vec<&ConnectedClient> {
        self.by_id
            .values()
            .filter(|client| client.application.symbolic_name == symbolic_name)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
