//! Transport seam between execution contexts and the broker.
//!
//! The physical boundary transport is an external primitive. This module
//! pins down its shape: a context exposes a [`ContextPort`] the broker
//! delivers envelopes through, and submits its own envelopes through a
//! [`GatewayPort`]. The gateway stamps the sender's origin and reply port
//! onto every submission, out of reach of the sending code, which is what
//! lets the broker trust them.
//!
//! [`endpoint`] provides the in-process implementation used by embeddings
//! and tests.

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::message::MessageId;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Stable identity of one context endpoint.
///
/// The broker keys connected clients by this id, so a client's traffic is
/// only ever accepted from the port it connected through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(Uuid);

impl EndpointId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reply address of a context, held by the broker.
pub trait ContextPort: Send + Sync {
    /// Identity of the endpoint behind this port.
    fn endpoint(&self) -> EndpointId;

    /// Hands an envelope to the transport without waiting for receipt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelClosed`] if the context is gone. The broker
    /// treats that as a stale client and prunes it.
    fn deliver(&self, envelope: Envelope) -> Result<()>;
}

/// In-process [`ContextPort`] over an unbounded channel.
///
/// Unbounded so that fan-out delivery never blocks the broker and never
/// drops a copy; a context that stops draining its receiver only grows its
/// own queue.
#[derive(Debug, Clone)]
pub struct MpscPort {
    endpoint: EndpointId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ContextPort for MpscPort {
    fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    fn deliver(&self, envelope: Envelope) -> Result<()> {
        self.tx.send(envelope).map_err(|_| Error::ChannelClosed)
    }
}

/// Creates an in-process context endpoint: the port handed to brokers and
/// gateways, and the receiver the context consumes.
#[must_use]
pub fn endpoint() -> (Arc<MpscPort>, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let port = MpscPort {
        endpoint: EndpointId::new(),
        tx,
    };
    (Arc::new(port), rx)
}

/// One inbound submission as the broker sees it: the envelope plus the
/// transport-asserted sender origin and reply port.
pub struct Inbound {
    pub envelope: Envelope,
    pub origin: String,
    pub port: Arc<dyn ContextPort>,
}

impl Inbound {
    #[must_use]
    pub fn message_id(&self) -> MessageId {
        self.envelope.message_id
    }
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inbound")
            .field("message_id", &self.envelope.message_id)
            .field("channel", &self.envelope.channel.tag())
            .field("origin", &self.origin)
            .field("endpoint", &self.port.endpoint())
            .finish()
    }
}

/// A context's handle for submitting envelopes to a prospective broker.
///
/// Constructed by the transport layer with the sender's origin and reply
/// port fixed, so submissions carry them unforgeably.
#[derive(Clone)]
pub struct GatewayPort {
    origin: String,
    port: Arc<dyn ContextPort>,
    inbox: mpsc::Sender<Inbound>,
}

impl GatewayPort {
    #[must_use]
    pub fn new(
        origin: impl Into<String>,
        port: Arc<dyn ContextPort>,
        inbox: mpsc::Sender<Inbound>,
    ) -> Self {
        Self {
            origin: origin.into(),
            port,
            inbox,
        }
    }

    /// Origin this gateway asserts for every submission.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Endpoint of the reply port this gateway asserts.
    #[must_use]
    pub fn endpoint(&self) -> EndpointId {
        self.port.endpoint()
    }

    /// Submits an envelope to the broker without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BrokerBusy`] when the broker inbox is full and
    /// [`Error::ChannelClosed`] when the broker is gone.
    pub fn submit(&self, envelope: Envelope) -> Result<()> {
        let inbound = Inbound {
            envelope,
            origin: self.origin.clone(),
            port: Arc::clone(&self.port),
        };
        self.inbox.try_send(inbound).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => Error::BrokerBusy,
            mpsc::error::TrySendError::Closed(_) => Error::ChannelClosed,
        })
    }
}

impl fmt::Debug for GatewayPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayPort")
            .field("origin", &self.origin)
            .field("endpoint", &self.port.endpoint())
            .finish()
    }
}
