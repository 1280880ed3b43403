//! The client-side connector.
//!
//! A [`Connector`] discovers a broker by racing connect envelopes through
//! candidate gateways, then offers acknowledged publishes, pattern
//! subscriptions, request/reply conversations, intents, and subscriber-count
//! observations over the winning connection.
//!
//! # Example
//!
//! ```rust,no_run
//! use mullion::connector::{Connector, ConnectorConfig};
//! use mullion::transport;
//!
//! # async fn run(handle: mullion::broker::BrokerHandle) -> Result<(), mullion::Error> {
//! let (port, inbound) = transport::endpoint();
//! let gateway = handle.gateway("https://inventory.example.org", port);
//! let connector = Connector::discover(
//!     "inventory",
//!     vec![gateway],
//!     inbound,
//!     ConnectorConfig::default(),
//! );
//! connector.when_connected().await?;
//!
//! let mut stock = connector.subscribe("stock/:item").await?;
//! connector.publish("stock/widgets", "42").await?;
//! let update = stock.recv().await;
//! # drop(update);
//! # Ok(())
//! # }
//! ```

mod client;
pub mod config;
mod subscription;

pub use client::{Connector, DiscoveryState};
pub use config::{ConnectorConfig, PublishOptions};
pub use subscription::{CountStream, IntentStream, ReplyStream, Subscription};
