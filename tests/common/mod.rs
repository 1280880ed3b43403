//! Shared fixtures: a running broker plus connected applications.

#![allow(dead_code)]

use mullion::broker::{BrokerHandle, MessageBroker};
use mullion::connector::{Connector, ConnectorConfig};
use mullion::registry::ApplicationDescriptor;
use mullion::transport;
use std::sync::Once;
use std::time::Duration;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

static TRACING: Once = Once::new();

/// Installs a `RUST_LOG`-filtered subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Origin registered for an application in test fixtures.
pub fn origin_of(app: &str) -> String {
    format!("https://{app}.example.org")
}

/// Descriptor with the fixture origin for `app`.
pub fn descriptor(app: &str) -> ApplicationDescriptor {
    ApplicationDescriptor::new(app, origin_of(app))
}

/// Starts a broker knowing the given applications.
pub fn start_broker(descriptors: Vec<ApplicationDescriptor>) -> BrokerHandle {
    init_tracing();
    MessageBroker::builder()
        .applications(descriptors)
        .expect("test descriptors are valid")
        .build()
        .start()
}

/// Connects `app` to the broker under its fixture origin and waits for the
/// handshake to settle.
pub async fn connect(handle: &BrokerHandle, app: &str) -> Connector {
    let (port, inbound) = transport::endpoint();
    let gateway = handle.gateway(origin_of(app), port);
    let connector = Connector::discover(app, vec![gateway], inbound, ConnectorConfig::default());
    connector
        .when_connected()
        .await
        .expect("fixture handshake succeeds");
    connector
}

/// Connects `app` asserting an explicit origin; the handshake may refuse.
pub async fn try_connect(
    handle: &BrokerHandle,
    app: &str,
    origin: &str,
) -> (Connector, mullion::Result<mullion::ClientId>) {
    let (port, inbound) = transport::endpoint();
    let gateway = handle.gateway(origin, port);
    let connector = Connector::discover(
        app,
        vec![gateway],
        inbound,
        ConnectorConfig::default().with_discovery_timeout(Duration::from_millis(500)),
    );
    let outcome = connector.when_connected().await;
    (connector, outcome)
}
