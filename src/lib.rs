//! # Mullion
//!
//! A cross-boundary publish/subscribe and intent-routing broker for isolated
//! execution contexts. One trusted [`broker::MessageBroker`] mediates every
//! exchange between contexts that can only pass opaque envelopes over an
//! untrusted channel; each context talks to it through a
//! [`connector::Connector`].
//!
//! The broker offers:
//! - topic messaging with `:name` single-segment captures ([`topic`])
//! - retained messages replayed to late subscribers
//! - acknowledged, timeout-bounded publishes and request/reply conversations
//! - capability-based intent routing with declared intentions
//! - a pluggable pre-publish interceptor chain ([`interceptor`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use mullion::broker::MessageBroker;
//! use mullion::connector::{Connector, ConnectorConfig};
//! use mullion::registry::ApplicationDescriptor;
//! use mullion::transport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = MessageBroker::builder()
//!         .applications(vec![ApplicationDescriptor::new(
//!             "inventory",
//!             "https://inventory.example.org",
//!         )])?
//!         .build();
//!     let handle = broker.start();
//!
//!     let (port, inbound) = transport::endpoint();
//!     let gateway = handle.gateway("https://inventory.example.org", port);
//!     let connector =
//!         Connector::discover("inventory", vec![gateway], inbound, ConnectorConfig::default());
//!     connector.when_connected().await?;
//!
//!     let mut stock = connector.subscribe("stock/:item").await?;
//!     connector.publish("stock/widgets", "42").await?;
//!     let update = stock.recv().await.expect("connection is live");
//!     assert_eq!(update.params["item"], "widgets");
//!
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Trust model
//!
//! The transport layer constructs each context's [`transport::GatewayPort`]
//! with the context's origin and reply port fixed; sending code cannot forge
//! either. The broker accepts a client's traffic only through the port it
//! connected with, under the application's registered origin, and overwrites
//! the reserved headers (message id, application name, client id, timestamp,
//! subscriber id) on every message after the interceptor chain has run.

#![warn(clippy::pedantic)]

pub mod broker;
pub mod connector;
pub mod envelope;
pub mod error;
pub mod intent;
pub mod interceptor;
pub mod message;
pub mod registry;
pub mod topic;
pub mod transport;

pub use broker::{BrokerConfig, BrokerHandle, MessageBroker};
pub use connector::{Connector, ConnectorConfig, PublishOptions, Subscription};
pub use envelope::{Channel, ConnackCode, ConnackReply, Direction, Envelope};
pub use error::{Error, Result};
pub use intent::{Capability, Intent, Intention, Qualifier, QualifierValue, Visibility};
pub use message::{ClientId, DeliveryStatus, IntentMessage, MessageId, SubscriberId, TopicMessage};
pub use registry::{ApplicationDescriptor, ApplicationDirectory, CapabilityDeclaration};
pub use topic::{TopicParams, TopicPattern};
