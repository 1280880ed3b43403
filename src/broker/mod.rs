//! The message broker.
//!
//! A single-task broker for cross-boundary publish/subscribe and intent
//! routing. Build one with [`MessageBroker::builder`], start it, then hand
//! each context a gateway minted from the [`BrokerHandle`].
//!
//! # Example
//!
//! ```rust,no_run
//! use mullion::broker::MessageBroker;
//! use mullion::registry::ApplicationDescriptor;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = MessageBroker::builder()
//!     .applications(vec![ApplicationDescriptor::new(
//!         "inventory",
//!         "https://inventory.example.org",
//!     )])?
//!     .build();
//! let handle = broker.start();
//!
//! // ... mint gateways, serve traffic ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod server;

pub use config::BrokerConfig;
pub use server::{BrokerBuilder, BrokerHandle, MessageBroker};
