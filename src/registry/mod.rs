//! Broker-side registries: registered applications, connected clients,
//! topic subscriptions, retained messages.
//!
//! Registries are plain data structures without interior locking. The
//! broker's single processing task owns them and mutates them strictly in
//! envelope arrival order.

pub mod application;
pub mod client;
pub mod retained;
pub mod subscription;

pub use application::{
    Application, ApplicationDescriptor, ApplicationDirectory, CapabilityDeclaration,
    StaticApplicationDirectory,
};
pub use client::{ClientRegistry, ConnectedClient};
pub use retained::{RetainOutcome, RetainedMessageStore};
pub use subscription::{Destination, TopicSubscription, TopicSubscriptionRegistry};
