//! The broker core: one sequential task owning every registry.
//!
//! All inbound envelopes land in a single queue and are handled strictly in
//! arrival order by a fully synchronous handler, so no operation ever
//! observes a half-applied sibling. Outbound delivery never blocks; a
//! context whose channel is gone is pruned on the spot.

use crate::broker::config::BrokerConfig;
use crate::envelope::{
    Channel, ConnackCode, ConnackReply, ConnectRequest, Direction, Envelope, SubscriptionRequest,
    UnsubscriptionRequest,
};
use crate::error::{Error, Result};
use crate::intent::Capability;
use crate::interceptor::{CaptureSlot, Interceptor, InterceptorChain, PublishHandler};
use crate::message::{
    headers::{APP_SYMBOLIC_NAME, CLIENT_ID, MESSAGE_ID, SUBSCRIBER_ID, TIMESTAMP},
    ClientId, DeliveryStatus, Headers, IntentMessage, MessageId, TopicMessage,
    SUBSCRIBER_COUNT_TOPIC,
};
use crate::registry::application::{
    ApplicationDescriptor, ApplicationDirectory, StaticApplicationDirectory,
};
use crate::registry::client::{ClientRegistry, ConnectedClient};
use crate::registry::retained::{RetainOutcome, RetainedMessageStore};
use crate::registry::subscription::{Destination, TopicSubscriptionRegistry};
use crate::topic::{validate_topic, TopicPattern};
use crate::transport::{ContextPort, EndpointId, GatewayPort, Inbound};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Renders a panic payload for the log line.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("opaque panic payload")
}

/// Millisecond clock that never repeats within one broker run, so retained
/// recency never ties between two stamps of the same broker.
#[derive(Debug, Default)]
struct TimestampClock {
    last: u64,
}

impl TimestampClock {
    fn next(&mut self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| {
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
            });
        self.last = now.max(self.last.saturating_add(1));
        self.last
    }
}

/// A live subscriber-count observation: re-publish the count of `topic` to
/// `reply_to` whenever it changes, until the reply topic loses its last
/// subscriber.
#[derive(Debug)]
struct CountObservation {
    topic: String,
    reply_to: String,
    last: usize,
}

/// Builder for [`MessageBroker`].
pub struct BrokerBuilder {
    config: BrokerConfig,
    directory: Option<Arc<dyn ApplicationDirectory>>,
    message_interceptors: Vec<Arc<dyn Interceptor<TopicMessage>>>,
    intent_interceptors: Vec<Arc<dyn Interceptor<IntentMessage>>>,
}

impl BrokerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: BrokerConfig::default(),
            directory: None,
            message_interceptors: Vec::new(),
            intent_interceptors: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs an application directory.
    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn ApplicationDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Builds a static directory from descriptors and installs it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidApplication`] for malformed or duplicate
    /// descriptors.
    pub fn applications(mut self, descriptors: Vec<ApplicationDescriptor>) -> Result<Self> {
        self.directory = Some(Arc::new(StaticApplicationDirectory::new(descriptors)?));
        Ok(self)
    }

    /// Appends a pre-publish interceptor for topic messages. Interceptors
    /// run in registration order.
    #[must_use]
    pub fn message_interceptor(mut self, interceptor: Arc<dyn Interceptor<TopicMessage>>) -> Self {
        self.message_interceptors.push(interceptor);
        self
    }

    /// Appends a pre-publish interceptor for intents.
    #[must_use]
    pub fn intent_interceptor(mut self, interceptor: Arc<dyn Interceptor<IntentMessage>>) -> Self {
        self.intent_interceptors.push(interceptor);
        self
    }

    #[must_use]
    pub fn build(self) -> MessageBroker {
        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(StaticApplicationDirectory::default()));
        let message_slot = Arc::new(CaptureSlot::new());
        let message_chain = InterceptorChain::new(
            self.message_interceptors,
            Arc::clone(&message_slot) as Arc<dyn PublishHandler<TopicMessage>>,
        );
        let intent_slot = Arc::new(CaptureSlot::new());
        let intent_chain = InterceptorChain::new(
            self.intent_interceptors,
            Arc::clone(&intent_slot) as Arc<dyn PublishHandler<IntentMessage>>,
        );
        MessageBroker {
            config: self.config,
            directory,
            clients: ClientRegistry::new(),
            subscriptions: TopicSubscriptionRegistry::new(),
            retained: RetainedMessageStore::new(),
            message_chain,
            message_slot,
            intent_chain,
            intent_slot,
            observations: Vec::new(),
            clock: TimestampClock::default(),
        }
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running broker: mints gateways and shuts the broker down.
#[derive(Clone)]
pub struct BrokerHandle {
    inbox: mpsc::Sender<Inbound>,
    shutdown: Arc<watch::Sender<bool>>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl BrokerHandle {
    /// Creates a gateway submitting into this broker on behalf of a context
    /// with the given origin and reply port.
    #[must_use]
    pub fn gateway(&self, origin: impl Into<String>, port: Arc<dyn ContextPort>) -> GatewayPort {
        GatewayPort::new(origin, port, self.inbox.clone())
    }

    /// Stops the broker and waits for its task to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let join = self.join.lock().await.take();
        if let Some(join) = join {
            let _ = join.await;
        }
    }
}

/// The message broker.
///
/// Owns the client, subscription, and retained registries without interior
/// locking; [`MessageBroker::start`] moves it onto its processing task and
/// hands back a [`BrokerHandle`].
pub struct MessageBroker {
    config: BrokerConfig,
    directory: Arc<dyn ApplicationDirectory>,
    clients: ClientRegistry,
    subscriptions: TopicSubscriptionRegistry,
    retained: RetainedMessageStore,
    message_chain: InterceptorChain<TopicMessage>,
    message_slot: Arc<CaptureSlot<TopicMessage>>,
    intent_chain: InterceptorChain<IntentMessage>,
    intent_slot: Arc<CaptureSlot<IntentMessage>>,
    observations: Vec<CountObservation>,
    clock: TimestampClock,
}

impl MessageBroker {
    #[must_use]
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    /// Spawns the processing task.
    ///
    /// The broker runs until the handle shuts it down or every gateway and
    /// handle clone is gone.
    #[must_use]
    pub fn start(self) -> BrokerHandle {
        let (inbox_tx, inbox_rx) = mpsc::channel(self.config.inbox_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(inbox_rx, shutdown_rx));
        BrokerHandle {
            inbox: inbox_tx,
            shutdown: Arc::new(shutdown_tx),
            join: Arc::new(Mutex::new(Some(join))),
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Inbound>, mut shutdown: watch::Receiver<bool>) {
        debug!("broker started");
        let mut shutdown_open = true;
        loop {
            tokio::select! {
                changed = shutdown.changed(), if shutdown_open => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => break,
                        Ok(()) => {}
                        // Every handle is gone; serve gateways until they close.
                        Err(_) => shutdown_open = false,
                    }
                }
                inbound = inbox.recv() => match inbound {
                    Some(inbound) => {
                        // A panic out of one envelope must not take the
                        // loop down with it.
                        let message_id = inbound.envelope.message_id;
                        let handled =
                            panic::catch_unwind(AssertUnwindSafe(|| self.handle_inbound(inbound)));
                        if let Err(payload) = handled {
                            error!(
                                %message_id,
                                panic = panic_message(payload.as_ref()),
                                "envelope handling panicked; continuing"
                            );
                        }
                    }
                    None => break,
                }
            }
        }
        info!(clients = self.clients.len(), "broker stopped");
    }

    /// Handles one envelope. Never returns early without logging, and the
    /// run loop catches any panic that escapes a user-supplied interceptor:
    /// a bad envelope must not stall the loop.
    fn handle_inbound(&mut self, inbound: Inbound) {
        let Inbound {
            envelope,
            origin,
            port,
        } = inbound;
        if envelope.transport != Direction::ClientToBroker {
            warn!(message_id = %envelope.message_id, "dropped envelope with wrong direction tag");
            return;
        }
        let message_id = envelope.message_id;
        let endpoint = port.endpoint();
        trace!(%message_id, channel = envelope.channel.tag(), %origin, "inbound envelope");
        match envelope.channel {
            Channel::Connect(request) => self.handle_connect(message_id, &request, &origin, port),
            Channel::Disconnect => self.handle_disconnect(&origin, endpoint),
            Channel::Topic(message) => {
                self.client_request(message_id, &origin, endpoint, |broker, client| {
                    broker.publish_topic_message(client, message_id, message)
                });
            }
            Channel::TopicSubscribe(request) => {
                self.client_request(message_id, &origin, endpoint, |broker, client| {
                    broker.subscribe(client, request)
                });
            }
            Channel::TopicUnsubscribe(request) => {
                self.client_request(message_id, &origin, endpoint, |broker, client| {
                    broker.unsubscribe(client, &request)
                });
            }
            Channel::Intent(message) => {
                self.client_request(message_id, &origin, endpoint, |broker, client| {
                    broker.publish_intent(client, message_id, message)
                });
            }
        }
    }

    /// Authorizes the sender, runs `op`, reports the outcome as a delivery
    /// status, and refreshes count observations.
    fn client_request<F>(&mut self, message_id: MessageId, origin: &str, endpoint: EndpointId, op: F)
    where
        F: FnOnce(&mut Self, &ConnectedClient) -> Result<()>,
    {
        let client = match self.authorized_client(origin, endpoint) {
            Ok(client) => client,
            Err(error) => {
                // Not attributable to a connected client, so there is nobody
                // to report a status to.
                warn!(%message_id, %error, "dropped unattributable envelope");
                return;
            }
        };
        // A panicking interceptor is attributable here, so the sender gets a
        // failure status instead of a silent timeout.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| op(self, &client)))
            .unwrap_or_else(|payload| {
                error!(
                    client = %client.id,
                    %message_id,
                    panic = panic_message(payload.as_ref()),
                    "request handling panicked"
                );
                Err(Error::Rejected(
                    "internal error while handling the request".to_string(),
                ))
            });
        if let Err(error) = &outcome {
            debug!(client = %client.id, %message_id, %error, "request failed");
        }
        self.send_delivery_status(client.id, message_id, &outcome);
        self.notify_count_observers();
    }

    /// The channel invariant: traffic counts as a client's only when it
    /// arrives through the port that client connected with, under the same
    /// origin.
    fn authorized_client(&self, origin: &str, endpoint: EndpointId) -> Result<ConnectedClient> {
        let client = self
            .clients
            .lookup_by_channel(endpoint)
            .ok_or(Error::NotConnected)?;
        if client.application.origin != origin {
            return Err(Error::OriginMismatch {
                asserted: origin.to_string(),
            });
        }
        Ok(client.clone())
    }

    fn handle_connect(
        &mut self,
        message_id: MessageId,
        request: &ConnectRequest,
        origin: &str,
        port: Arc<dyn ContextPort>,
    ) {
        let connack = match request.app.as_deref().filter(|app| !app.is_empty()) {
            None => {
                warn!(origin, "refused connect: application name missing");
                ConnackReply::refused(ConnackCode::BadRequest, "application name missing")
            }
            Some(app) => match self.directory.application(app) {
                None => {
                    warn!(app, origin, "refused connect: unknown application");
                    ConnackReply::refused(
                        ConnackCode::Rejected,
                        format!("application '{app}' is not registered"),
                    )
                }
                Some(application) if application.origin != origin => {
                    warn!(
                        app,
                        origin,
                        registered = %application.origin,
                        "refused connect: origin mismatch"
                    );
                    ConnackReply::refused(
                        ConnackCode::Blocked,
                        format!("origin '{origin}' is not the registered origin of application '{app}'"),
                    )
                }
                Some(application) => {
                    let client = ConnectedClient::new(application, Arc::clone(&port));
                    let client_id = client.id;
                    if let Some(displaced) = self.clients.register(client) {
                        let removed = self.subscriptions.unsubscribe_client(displaced.id);
                        debug!(
                            displaced = %displaced.id,
                            subscriptions = removed,
                            "displaced client previously connected through this endpoint"
                        );
                    }
                    info!(client = %client_id, app, origin, "client connected");
                    ConnackReply::accepted(client_id)
                }
            },
        };

        let reply = Envelope::broker_to_client(Channel::Topic(
            TopicMessage::new(message_id.to_string()).with_body(connack.to_body()),
        ));
        if let Err(error) = port.deliver(reply) {
            debug!(%message_id, %error, "connack could not be delivered");
        }
        // Displacing a client may have dropped observed subscriptions.
        self.notify_count_observers();
    }

    fn handle_disconnect(&mut self, origin: &str, endpoint: EndpointId) {
        match self.authorized_client(origin, endpoint) {
            Ok(client) => {
                self.clients.unregister(client.id);
                let removed = self.subscriptions.unsubscribe_client(client.id);
                info!(
                    client = %client.id,
                    app = %client.application.symbolic_name,
                    subscriptions = removed,
                    "client disconnected"
                );
                self.notify_count_observers();
            }
            Err(error) => debug!(%error, "stray disconnect ignored"),
        }
    }

    /// The topic publication pipeline: interceptors, reserved headers,
    /// retention, then fan-out.
    fn publish_topic_message(
        &mut self,
        client: &ConnectedClient,
        message_id: MessageId,
        message: TopicMessage,
    ) -> Result<()> {
        if message.topic == SUBSCRIBER_COUNT_TOPIC {
            return self.observe_subscriber_count(client, message);
        }
        validate_topic(&message.topic)?;

        // A chain that panicked mid-flight may have left a captured message
        // behind; it must not leak into this publish.
        self.message_slot.take();
        self.message_chain.publish(message)?;
        let Some(mut message) = self.message_slot.take() else {
            trace!(%message_id, "message swallowed by an interceptor");
            return Ok(());
        };
        self.stamp_reserved_headers(&mut message.headers, client, message_id);

        if message.retain
            && self.retained.persist_or_delete(message.clone()) == RetainOutcome::Deleted
        {
            debug!(topic = %message.topic, "retained entry deleted");
            return Ok(());
        }
        self.route_topic_message(&message)
    }

    fn route_topic_message(&mut self, message: &TopicMessage) -> Result<()> {
        let destinations = self.subscriptions.resolve(&message.topic);
        if destinations.is_empty() {
            if message.reply_to.is_some() {
                return Err(Error::RequestReply(format!(
                    "no subscriber listens on topic '{}'",
                    message.topic
                )));
            }
            trace!(topic = %message.topic, "no subscribers; message dropped");
            return Ok(());
        }
        self.fan_out(message, destinations);
        Ok(())
    }

    /// One copy per destination, tagged with the destination's subscriber id
    /// and capture values.
    fn fan_out(&mut self, message: &TopicMessage, destinations: Vec<Destination>) {
        for destination in destinations {
            let mut copy = message.clone();
            copy.params = destination.params;
            copy.set_header(SUBSCRIBER_ID, destination.subscriber_id.to_string());
            self.deliver_to_client(destination.client_id, copy);
        }
    }

    fn deliver_to_client(&mut self, client_id: ClientId, message: TopicMessage) {
        // The client may have been pruned earlier in this same fan-out.
        let Some(client) = self.clients.lookup_by_id(client_id) else {
            return;
        };
        let port = Arc::clone(&client.port);
        let envelope = Envelope::broker_to_client(Channel::Topic(message));
        if let Err(error) = port.deliver(envelope) {
            self.prune_stale_client(client_id, &error);
        }
    }

    fn prune_stale_client(&mut self, client_id: ClientId, error: &Error) {
        if let Some(client) = self.clients.unregister(client_id) {
            let removed = self.subscriptions.unsubscribe_client(client_id);
            debug!(
                client = %client_id,
                app = %client.application.symbolic_name,
                subscriptions = removed,
                %error,
                "pruned stale client"
            );
        }
    }

    fn subscribe(&mut self, client: &ConnectedClient, request: SubscriptionRequest) -> Result<()> {
        let pattern = TopicPattern::parse(request.pattern)?;
        if !self
            .subscriptions
            .subscribe(pattern.clone(), client.id, request.subscriber_id)
        {
            return Err(Error::Rejected(format!(
                "subscriber id '{}' is already registered",
                request.subscriber_id
            )));
        }
        debug!(
            client = %client.id,
            pattern = %pattern,
            subscriber = %request.subscriber_id,
            "subscribed"
        );

        // Replay the freshest retained match to the new subscription only.
        let replay = self.retained.find_most_recent(&pattern).cloned();
        if let Some(mut replay) = replay {
            if let Some(params) = pattern.capture(&replay.topic) {
                replay.params = params;
            }
            replay.set_header(SUBSCRIBER_ID, request.subscriber_id.to_string());
            self.deliver_to_client(client.id, replay);
        }
        Ok(())
    }

    fn unsubscribe(
        &mut self,
        client: &ConnectedClient,
        request: &UnsubscriptionRequest,
    ) -> Result<()> {
        if self
            .subscriptions
            .unsubscribe_subscriber(request.subscriber_id, client.id)
        {
            debug!(client = %client.id, subscriber = %request.subscriber_id, "unsubscribed");
            Ok(())
        } else {
            Err(Error::UnknownSubscriber(request.subscriber_id.to_string()))
        }
    }

    /// The intent publication pipeline: interceptors, reserved headers,
    /// qualification, capability matching, then per-provider delivery.
    fn publish_intent(
        &mut self,
        client: &ConnectedClient,
        message_id: MessageId,
        message: IntentMessage,
    ) -> Result<()> {
        if message.intent.kind.is_empty() {
            return Err(Error::InvalidIntent("intent type must not be empty".to_string()));
        }

        self.intent_slot.take();
        self.intent_chain.publish(message)?;
        let Some(mut message) = self.intent_slot.take() else {
            trace!(%message_id, "intent swallowed by an interceptor");
            return Ok(());
        };
        self.stamp_reserved_headers(&mut message.headers, client, message_id);

        let application = client.application.as_ref();
        if application.intention_check
            && !self
                .directory
                .intention_declared(&application.symbolic_name, &message.intent)
        {
            return Err(Error::NotQualified {
                app: application.symbolic_name.clone(),
                kind: message.intent.kind.clone(),
            });
        }

        let capabilities = self.directory.matching_capabilities(&message.intent, application);
        if capabilities.is_empty() {
            return Err(Error::NullProvider {
                kind: message.intent.kind.clone(),
            });
        }

        let mut deliveries: Vec<(ClientId, Capability)> = Vec::new();
        for capability in capabilities {
            let providers: Vec<ClientId> = self
                .clients
                .list_by_application(&capability.application)
                .iter()
                .map(|provider| provider.id)
                .collect();
            for provider in providers {
                deliveries.push((provider, capability.clone()));
            }
        }
        if deliveries.is_empty() {
            if message.reply_to.is_some() {
                return Err(Error::RequestReply(format!(
                    "no connected application provides a capability matching intents of type '{}'",
                    message.intent.kind
                )));
            }
            debug!(intent = %message.intent.kind, "no connected provider; intent dropped");
            return Ok(());
        }

        let mut per_client: HashMap<ClientId, usize> = HashMap::new();
        for (client_id, _) in &deliveries {
            *per_client.entry(*client_id).or_insert(0) += 1;
        }
        for (client_id, matches) in per_client {
            if matches > 1 {
                warn!(
                    client = %client_id,
                    intent = %message.intent.kind,
                    matches,
                    "intent matches multiple capabilities of one client; delivering every match"
                );
            }
        }

        for (client_id, capability) in deliveries {
            let mut copy = message.clone();
            copy.capability = Some(capability);
            self.deliver_intent_to_client(client_id, copy);
        }
        Ok(())
    }

    fn deliver_intent_to_client(&mut self, client_id: ClientId, message: IntentMessage) {
        let Some(client) = self.clients.lookup_by_id(client_id) else {
            return;
        };
        let port = Arc::clone(&client.port);
        let envelope = Envelope::broker_to_client(Channel::Intent(message));
        if let Err(error) = port.deliver(envelope) {
            self.prune_stale_client(client_id, &error);
        }
    }

    /// Starts a subscriber-count observation. The observed topic travels as
    /// the request body; counts are published to the reply topic.
    fn observe_subscriber_count(
        &mut self,
        client: &ConnectedClient,
        message: TopicMessage,
    ) -> Result<()> {
        let Some(reply_to) = message.reply_to.clone() else {
            return Err(Error::RequestReply(
                "subscriber count requests need a reply-to topic".to_string(),
            ));
        };
        let observed = String::from_utf8(message.body_bytes().to_vec()).map_err(|_| {
            Error::InvalidTopic("subscriber count request body must be a UTF-8 topic".to_string())
        })?;
        validate_topic(&observed)?;

        let count = self.subscriptions.subscription_count(&observed);
        debug!(client = %client.id, topic = %observed, count, "subscriber count observation started");
        self.observations.push(CountObservation {
            topic: observed,
            reply_to: reply_to.clone(),
            last: count,
        });
        self.publish_count(&reply_to, count);
        Ok(())
    }

    fn publish_count(&mut self, reply_to: &str, count: usize) {
        let message = TopicMessage::new(reply_to).with_body(count.to_string());
        let destinations = self.subscriptions.resolve(reply_to);
        self.fan_out(&message, destinations);
    }

    /// Re-publishes changed counts and drops observations whose reply topic
    /// lost its last subscriber.
    fn notify_count_observers(&mut self) {
        if self.observations.is_empty() {
            return;
        }
        let mut observations = std::mem::take(&mut self.observations);
        observations
            .retain(|observation| self.subscriptions.subscription_count(&observation.reply_to) > 0);
        for observation in &mut observations {
            let count = self.subscriptions.subscription_count(&observation.topic);
            if count != observation.last {
                observation.last = count;
                let reply_to = observation.reply_to.clone();
                self.publish_count(&reply_to, count);
            }
        }
        self.observations = observations;
    }

    fn send_delivery_status(
        &mut self,
        client_id: ClientId,
        message_id: MessageId,
        outcome: &Result<()>,
    ) {
        let status = match outcome {
            Ok(()) => DeliveryStatus::success(),
            Err(error) => DeliveryStatus::failure(error.to_string()),
        };
        let message = TopicMessage::new(message_id.to_string()).with_body(status.to_body());
        self.deliver_to_client(client_id, message);
    }

    /// Reserved headers are broker-owned: whatever the publisher put there
    /// is overwritten after the interceptor chain has run.
    fn stamp_reserved_headers(
        &mut self,
        map: &mut Headers,
        client: &ConnectedClient,
        message_id: MessageId,
    ) {
        map.insert(MESSAGE_ID.to_string(), Value::from(message_id.to_string()));
        map.insert(
            APP_SYMBOLIC_NAME.to_string(),
            Value::from(client.application.symbolic_name.clone()),
        );
        map.insert(CLIENT_ID.to_string(), Value::from(client.id.to_string()));
        map.insert(TIMESTAMP.to_string(), Value::from(self.clock.next()));
        // Per-copy tag, stamped on dispatch only.
        map.remove(SUBSCRIBER_ID);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::endpoint;
    use tokio::time::{timeout, Duration};

    fn applications() -> Vec<ApplicationDescriptor> {
        vec![ApplicationDescriptor::new(
            "shop",
            "https://shop.example.org",
        )]
    }

    async fn start() -> BrokerHandle {
        MessageBroker::builder()
            .applications(applications())
            .unwrap()
            .build()
            .start()
    }

    async fn status_for(
        rx: &mut mpsc::UnboundedReceiver<Envelope>,
        request_id: MessageId,
    ) -> DeliveryStatus {
        let key = request_id.to_string();
        loop {
            let envelope = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out waiting for delivery status")
                .expect("context channel closed");
            if let Channel::Topic(message) = envelope.channel {
                if message.topic == key {
                    return DeliveryStatus::from_body(message.body_bytes())
                        .expect("status body decodes");
                }
            }
        }
    }

    async fn connack_for(
        rx: &mut mpsc::UnboundedReceiver<Envelope>,
        connect_id: MessageId,
    ) -> ConnackReply {
        let key = connect_id.to_string();
        loop {
            let envelope = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out waiting for connack")
                .expect("context channel closed");
            if let Channel::Topic(message) = envelope.channel {
                if message.topic == key {
                    return ConnackReply::from_body(message.body_bytes())
                        .expect("connack body decodes");
                }
            }
        }
    }

    #[tokio::test]
    async fn connect_is_acknowledged_with_a_client_id() {
        let handle = start().await;
        let (port, mut rx) = endpoint();
        let gateway = handle.gateway("https://shop.example.org", port);

        let connect = Envelope::client_to_broker(Channel::Connect(ConnectRequest::new("shop")));
        let id = connect.message_id;
        gateway.submit(connect).unwrap();

        let connack = connack_for(&mut rx, id).await;
        assert_eq!(connack.status, ConnackCode::Accepted);
        assert!(connack.client_id.is_some());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_application_is_rejected() {
        let handle = start().await;
        let (port, mut rx) = endpoint();
        let gateway = handle.gateway("https://shop.example.org", port);

        let connect = Envelope::client_to_broker(Channel::Connect(ConnectRequest::new("ghost")));
        let id = connect.message_id;
        gateway.submit(connect).unwrap();

        let connack = connack_for(&mut rx, id).await;
        assert_eq!(connack.status, ConnackCode::Rejected);
        assert!(connack.client_id.is_none());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn origin_mismatch_is_blocked() {
        let handle = start().await;
        let (port, mut rx) = endpoint();
        let gateway = handle.gateway("https://evil.example.org", port);

        let connect = Envelope::client_to_broker(Channel::Connect(ConnectRequest::new("shop")));
        let id = connect.message_id;
        gateway.submit(connect).unwrap();

        let connack = connack_for(&mut rx, id).await;
        assert_eq!(connack.status, ConnackCode::Blocked);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn missing_application_name_is_a_bad_request() {
        let handle = start().await;
        let (port, mut rx) = endpoint();
        let gateway = handle.gateway("https://shop.example.org", port);

        let connect = Envelope::client_to_broker(Channel::Connect(ConnectRequest::default()));
        let id = connect.message_id;
        gateway.submit(connect).unwrap();

        let connack = connack_for(&mut rx, id).await;
        assert_eq!(connack.status, ConnackCode::BadRequest);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn traffic_before_connect_is_dropped_silently() {
        let handle = start().await;
        let (port, mut rx) = endpoint();
        let gateway = handle.gateway("https://shop.example.org", port);

        let publish =
            Envelope::client_to_broker(Channel::Topic(TopicMessage::new("a").with_body("x")));
        gateway.submit(publish).unwrap();

        // no status, no delivery
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn wrong_direction_envelopes_are_dropped() {
        let handle = start().await;
        let (port, mut rx) = endpoint();
        let gateway = handle.gateway("https://shop.example.org", port);

        let connect = Envelope::client_to_broker(Channel::Connect(ConnectRequest::new("shop")));
        let id = connect.message_id;
        gateway.submit(connect).unwrap();
        connack_for(&mut rx, id).await;

        let spoofed =
            Envelope::broker_to_client(Channel::Topic(TopicMessage::new("a").with_body("x")));
        gateway.submit(spoofed).unwrap();
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn a_panicking_interceptor_does_not_stop_the_broker() {
        let handle = MessageBroker::builder()
            .applications(applications())
            .unwrap()
            .message_interceptor(crate::interceptor::from_fn(
                |message: TopicMessage, next: &dyn PublishHandler<TopicMessage>| {
                    assert_ne!(message.topic, "boom", "unpublishable topic");
                    next.handle(message)
                },
            ))
            .build()
            .start();
        let (port, mut rx) = endpoint();
        let gateway = handle.gateway("https://shop.example.org", port);

        let connect = Envelope::client_to_broker(Channel::Connect(ConnectRequest::new("shop")));
        let connect_id = connect.message_id;
        gateway.submit(connect).unwrap();
        connack_for(&mut rx, connect_id).await;

        let bad =
            Envelope::client_to_broker(Channel::Topic(TopicMessage::new("boom").with_body("1")));
        let bad_id = bad.message_id;
        gateway.submit(bad).unwrap();
        let status = status_for(&mut rx, bad_id).await;
        assert!(!status.ok);
        assert!(status.details.unwrap().contains("internal error"));

        // The loop keeps serving envelopes afterwards.
        let good =
            Envelope::client_to_broker(Channel::Topic(TopicMessage::new("ok").with_body("2")));
        let good_id = good.message_id;
        gateway.submit(good).unwrap();
        let status = status_for(&mut rx, good_id).await;
        assert!(status.ok);
        handle.shutdown().await;
    }

    #[test]
    fn timestamps_are_strictly_increasing() {
        let mut clock = TimestampClock::default();
        let mut last = clock.next();
        for _ in 0..1000 {
            let next = clock.next();
            assert!(next > last);
            last = next;
        }
    }
}
