//! The connector: client-side access to a broker.

use crate::connector::config::{ConnectorConfig, PublishOptions};
use crate::connector::subscription::{CountStream, IntentStream, ReplyStream, Subscription};
use crate::envelope::{
    Channel, ConnackReply, ConnectRequest, Direction, Envelope, SubscriptionRequest,
    UnsubscriptionRequest,
};
use crate::error::{Error, Result};
use crate::intent::Intent;
use crate::message::{
    ClientId, DeliveryStatus, IntentMessage, SubscriberId, TopicMessage, SUBSCRIBER_COUNT_TOPIC,
};
use crate::transport::GatewayPort;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Where the connection to a broker currently stands.
#[derive(Debug, Clone)]
pub enum DiscoveryState {
    /// Connect envelopes are out; no gateway has answered yet.
    Connecting,
    /// A gateway accepted the handshake.
    Connected {
        client_id: ClientId,
        gateway: GatewayPort,
    },
    /// Discovery ended without a connection.
    Failed(Error),
}

/// State shared between connector clones and the routing task.
pub(super) struct Shared {
    app: String,
    config: ConnectorConfig,
    state: watch::Receiver<DiscoveryState>,
    /// Delivery-status waiters, keyed by the submitted envelope's message id
    /// rendered as a topic.
    pending: Mutex<HashMap<String, oneshot::Sender<DeliveryStatus>>>,
    /// Live subscription sinks, keyed by subscriber id.
    subscriptions: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<TopicMessage>>>,
    intent_tx: mpsc::UnboundedSender<IntentMessage>,
    intent_rx: Mutex<Option<mpsc::UnboundedReceiver<IntentMessage>>>,
    disconnected: AtomicBool,
    /// Dropped with the last connector clone; stops the routing task.
    _teardown: mpsc::UnboundedSender<()>,
}

/// Client-side access to a broker.
///
/// Clones share one connection. The connection tears itself down when the
/// last clone is dropped: a disconnect envelope is submitted and the routing
/// task stops.
#[derive(Clone)]
pub struct Connector {
    shared: Arc<Shared>,
}

impl Connector {
    /// Connects to whichever candidate gateway accepts first.
    ///
    /// One connect envelope goes out through every candidate; the first
    /// conclusive acknowledgment wins the race against
    /// [`ConnectorConfig::discovery_timeout`]. `inbound` must be the
    /// receiving half of the endpoint the candidates were minted with. Use
    /// one gateway per prospective broker.
    #[must_use]
    pub fn discover(
        app: impl Into<String>,
        candidates: Vec<GatewayPort>,
        inbound: mpsc::UnboundedReceiver<Envelope>,
        config: ConnectorConfig,
    ) -> Self {
        let app = app.into();
        let (state_tx, state_rx) = watch::channel(DiscoveryState::Connecting);
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (teardown_tx, teardown_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            app: app.clone(),
            config: config.clone(),
            state: state_rx,
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            intent_tx,
            intent_rx: Mutex::new(Some(intent_rx)),
            disconnected: AtomicBool::new(false),
            _teardown: teardown_tx,
        });
        tokio::spawn(drive(
            app,
            candidates,
            inbound,
            config,
            state_tx,
            Arc::downgrade(&shared),
            teardown_rx,
        ));
        Self { shared }
    }

    /// Waits until discovery settles and returns the assigned client id.
    ///
    /// # Errors
    ///
    /// Returns the discovery failure: [`Error::ConnectRefused`] when a
    /// gateway refused the handshake, [`Error::DiscoveryTimeout`] when none
    /// answered in time.
    pub async fn when_connected(&self) -> Result<ClientId> {
        let mut state = self.shared.state.clone();
        loop {
            {
                let current = state.borrow_and_update();
                match &*current {
                    DiscoveryState::Connected { client_id, .. } => return Ok(*client_id),
                    DiscoveryState::Failed(error) => return Err(error.clone()),
                    DiscoveryState::Connecting => {}
                }
            }
            state.changed().await.map_err(|_| Error::ChannelClosed)?;
        }
    }

    /// The assigned client id, if connected.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        self.shared.current_connection().map(|(id, _)| id)
    }

    /// Publishes a message and waits for the broker's delivery status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] with the broker's reason when the status
    /// reports a failure, [`Error::DeliveryTimeout`] when no status arrives
    /// in time, and [`Error::NotConnected`] before discovery settles.
    pub async fn publish(&self, topic: impl Into<String>, body: impl Into<Bytes>) -> Result<()> {
        self.publish_with(topic, body, PublishOptions::default())
            .await
    }

    /// Publishes a message with explicit options.
    ///
    /// # Errors
    ///
    /// As [`Connector::publish`].
    pub async fn publish_with(
        &self,
        topic: impl Into<String>,
        body: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<()> {
        let mut message = TopicMessage::new(topic).with_body(body);
        message.headers = options.headers;
        message.reply_to = options.reply_to;
        message.retain = options.retain;
        self.shared.send_acknowledged(Channel::Topic(message)).await
    }

    /// Deletes the retained message of `topic`, if any, and waits for the
    /// broker's delivery status.
    ///
    /// A retained publish without a body is the deletion form; the broker
    /// never dispatches it to subscribers.
    ///
    /// # Errors
    ///
    /// As [`Connector::publish`].
    pub async fn delete_retained(&self, topic: impl Into<String>) -> Result<()> {
        let message = TopicMessage::new(topic).with_retain(true);
        self.shared.send_acknowledged(Channel::Topic(message)).await
    }

    /// Subscribes to a topic pattern.
    ///
    /// The subscription is live once this returns; dropping the returned
    /// [`Subscription`] unsubscribes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] with the broker's reason when the pattern
    /// is invalid, plus the failures of [`Connector::publish`].
    pub async fn subscribe(&self, pattern: impl Into<String>) -> Result<Subscription> {
        let pattern = pattern.into();
        let subscriber_id = SubscriberId::new();
        let (sink, receiver) = mpsc::unbounded_channel();
        // Install the sink first so a retained replay racing the status is
        // not lost.
        self.shared
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subscriber_id, sink);
        let request = SubscriptionRequest {
            pattern: pattern.clone(),
            subscriber_id,
        };
        if let Err(error) = self
            .shared
            .send_acknowledged(Channel::TopicSubscribe(request))
            .await
        {
            self.shared
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&subscriber_id);
            return Err(error);
        }
        Ok(Subscription::new(
            Arc::clone(&self.shared),
            subscriber_id,
            pattern,
            receiver,
        ))
    }

    /// Publishes a request and returns the stream of replies.
    ///
    /// Replies arrive on a private, randomly named reply topic this call
    /// subscribes to; dropping the stream unsubscribes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] when nothing listens on the request topic,
    /// plus the failures of [`Connector::publish`].
    pub async fn request(
        &self,
        topic: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Result<ReplyStream> {
        self.request_with(topic, body, PublishOptions::default())
            .await
    }

    /// Publishes a request with explicit options.
    ///
    /// Any `reply_to` in the options is replaced by the private reply topic.
    ///
    /// # Errors
    ///
    /// As [`Connector::request`].
    pub async fn request_with(
        &self,
        topic: impl Into<String>,
        body: impl Into<Bytes>,
        options: PublishOptions,
    ) -> Result<ReplyStream> {
        let reply_topic = format!("reply/{}", Uuid::new_v4());
        let subscription = self.subscribe(reply_topic.clone()).await?;
        self.publish_with(topic, body, options.with_reply_to(reply_topic))
            .await?;
        Ok(ReplyStream::new(subscription))
    }

    /// Publishes an intent and waits for the broker's delivery status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rejected`] with the broker's reason when this
    /// application is not qualified to publish the intent or no provider
    /// matches it, plus the failures of [`Connector::publish`].
    pub async fn publish_intent(&self, intent: Intent, body: impl Into<Bytes>) -> Result<()> {
        let message = IntentMessage::new(intent).with_body(body);
        self.shared.send_acknowledged(Channel::Intent(message)).await
    }

    /// Publishes an intent expecting replies.
    ///
    /// # Errors
    ///
    /// As [`Connector::publish_intent`].
    pub async fn request_intent(
        &self,
        intent: Intent,
        body: impl Into<Bytes>,
    ) -> Result<ReplyStream> {
        let reply_topic = format!("reply/{}", Uuid::new_v4());
        let subscription = self.subscribe(reply_topic.clone()).await?;
        let message = IntentMessage::new(intent)
            .with_body(body)
            .with_reply_to(reply_topic);
        self.shared
            .send_acknowledged(Channel::Intent(message))
            .await?;
        Ok(ReplyStream::new(subscription))
    }

    /// Starts observing how many subscriptions match `topic`.
    ///
    /// The stream yields the current count immediately and then every
    /// change; the observation ends when the stream is dropped.
    ///
    /// # Errors
    ///
    /// As [`Connector::request`].
    pub async fn observe_subscriber_count(
        &self,
        topic: impl Into<String>,
    ) -> Result<CountStream> {
        let replies = self.request(SUBSCRIBER_COUNT_TOPIC, topic.into()).await?;
        Ok(CountStream::new(replies))
    }

    /// The stream of intents routed to this application's capabilities.
    ///
    /// Returns `None` on every call after the first; there is exactly one
    /// consumer.
    #[must_use]
    pub fn intents(&self) -> Option<IntentStream> {
        self.shared
            .intent_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(IntentStream::new)
    }

    /// Disconnects from the broker. Idempotent; also runs when the last
    /// connector clone is dropped.
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }
}

impl Shared {
    fn current_connection(&self) -> Option<(ClientId, GatewayPort)> {
        match &*self.state.borrow() {
            DiscoveryState::Connected { client_id, gateway } => {
                Some((*client_id, gateway.clone()))
            }
            _ => None,
        }
    }

    fn connection(&self) -> Result<GatewayPort> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        match &*self.state.borrow() {
            DiscoveryState::Connected { gateway, .. } => Ok(gateway.clone()),
            DiscoveryState::Connecting => Err(Error::NotConnected),
            DiscoveryState::Failed(error) => Err(error.clone()),
        }
    }

    /// Submits an envelope and waits for its delivery status.
    async fn send_acknowledged(&self, channel: Channel) -> Result<()> {
        let gateway = self.connection()?;
        let envelope = Envelope::client_to_broker(channel);
        let key = envelope.message_id.to_string();
        let (waiter, status) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), waiter);
        if let Err(error) = gateway.submit(envelope) {
            self.remove_pending(&key);
            return Err(error);
        }
        match timeout(self.config.delivery_timeout, status).await {
            Ok(Ok(status)) if status.ok => Ok(()),
            Ok(Ok(status)) => Err(Error::Rejected(status.details.unwrap_or_default())),
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                self.remove_pending(&key);
                Err(Error::DeliveryTimeout)
            }
        }
    }

    fn remove_pending(&self, key: &str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Routes one broker envelope to its consumer.
    fn route(&self, envelope: Envelope) {
        if envelope.transport != Direction::BrokerToClient {
            trace!(message_id = %envelope.message_id, "ignored envelope with wrong direction tag");
            return;
        }
        match envelope.channel {
            Channel::Topic(message) => self.route_topic(message),
            Channel::Intent(message) => {
                if self.intent_tx.send(message).is_err() {
                    trace!("intent stream gone; intent discarded");
                }
            }
            other => trace!(channel = other.tag(), "ignored unexpected channel"),
        }
    }

    fn route_topic(&self, message: TopicMessage) {
        // Dispatched copies carry the target subscription's id.
        if let Some(subscriber_id) = message.subscriber_id() {
            let subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match subscriptions.get(&subscriber_id) {
                Some(sink) => {
                    if sink.send(message).is_err() {
                        trace!(subscriber = %subscriber_id, "subscription receiver gone");
                    }
                }
                None => {
                    trace!(subscriber = %subscriber_id, "message for unknown subscription discarded");
                }
            }
            return;
        }
        // Untagged broker messages correlate by topic: a delivery status on
        // the originating message id.
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&message.topic);
        match waiter {
            Some(waiter) => {
                let status = DeliveryStatus::from_body(message.body_bytes())
                    .unwrap_or_else(|| DeliveryStatus::failure("malformed delivery status"));
                let _ = waiter.send(status);
            }
            None => trace!(topic = %message.topic, "uncorrelated broker message discarded"),
        }
    }

    /// Forgets a subscription sink and tells the broker, best effort.
    pub(super) fn remove_subscription(&self, subscriber_id: SubscriberId) {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&subscriber_id);
        if self.disconnected.load(Ordering::SeqCst) {
            return;
        }
        if let Some((_, gateway)) = self.current_connection() {
            let envelope = Envelope::client_to_broker(Channel::TopicUnsubscribe(
                UnsubscriptionRequest { subscriber_id },
            ));
            if let Err(error) = gateway.submit(envelope) {
                trace!(subscriber = %subscriber_id, %error, "unsubscribe not delivered");
            }
        }
    }

    fn disconnect(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        // Close consumer streams; they drain what is buffered and end.
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if let Some((client_id, gateway)) = self.current_connection() {
            match gateway.submit(Envelope::client_to_broker(Channel::Disconnect)) {
                Ok(()) => debug!(client = %client_id, app = %self.app, "disconnected"),
                Err(error) => {
                    debug!(client = %client_id, %error, "disconnect envelope not delivered");
                }
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Runs the handshake race, then routes broker traffic until the endpoint
/// closes or the last connector clone is gone.
async fn drive(
    app: String,
    candidates: Vec<GatewayPort>,
    mut inbound: mpsc::UnboundedReceiver<Envelope>,
    config: ConnectorConfig,
    state: watch::Sender<DiscoveryState>,
    shared: Weak<Shared>,
    mut teardown: mpsc::UnboundedReceiver<()>,
) {
    // One connect per candidate; the reply topic names the winner.
    let mut attempts: HashMap<String, GatewayPort> = HashMap::new();
    for gateway in candidates {
        let connect =
            Envelope::client_to_broker(Channel::Connect(ConnectRequest::new(app.clone())));
        let key = connect.message_id.to_string();
        match gateway.submit(connect) {
            Ok(()) => {
                attempts.insert(key, gateway);
            }
            Err(error) => {
                debug!(origin = %gateway.origin(), %error, "candidate gateway unreachable");
            }
        }
    }
    if attempts.is_empty() {
        error!(app, "discovery failed: no gateway accepted a connect envelope");
        let _ = state.send(DiscoveryState::Failed(Error::DiscoveryTimeout));
        return;
    }

    let deadline = tokio::time::sleep(config.discovery_timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => {
                error!(app, "discovery failed: no gateway answered in time");
                let _ = state.send(DiscoveryState::Failed(Error::DiscoveryTimeout));
                return;
            }
            _ = teardown.recv() => return,
            envelope = inbound.recv() => {
                let Some(envelope) = envelope else {
                    let _ = state.send(DiscoveryState::Failed(Error::ChannelClosed));
                    return;
                };
                let Channel::Topic(message) = &envelope.channel else { continue };
                let Some(gateway) = attempts.get(&message.topic) else { continue };
                let Some(connack) = ConnackReply::from_body(message.body_bytes()) else {
                    warn!(origin = %gateway.origin(), "malformed connack ignored");
                    continue;
                };
                if connack.is_accepted() {
                    let Some(client_id) = connack.client_id else {
                        warn!(origin = %gateway.origin(), "connack without a client id ignored");
                        continue;
                    };
                    info!(app, client = %client_id, origin = %gateway.origin(), "connected");
                    let _ = state.send(DiscoveryState::Connected {
                        client_id,
                        gateway: gateway.clone(),
                    });
                    break;
                }
                let details = connack.details.clone().unwrap_or_default();
                error!(app, status = %connack.status, details, "connect refused");
                let _ = state.send(DiscoveryState::Failed(Error::ConnectRefused {
                    code: connack.status,
                    details,
                }));
                return;
            }
        }
    }
    // Losing candidates must not keep our own endpoint alive.
    drop(attempts);

    loop {
        tokio::select! {
            _ = teardown.recv() => break,
            envelope = inbound.recv() => {
                let Some(envelope) = envelope else { break };
                let Some(shared) = shared.upgrade() else { break };
                shared.route(envelope);
            }
        }
    }
    debug!(app, "connector routing task stopped");
}
