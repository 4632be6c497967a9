//! One broker connection per manager, with timeout and failure handling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::broker::{Broker, BrokerConnection, Credentials, LinkState};
use crate::error::{ConnectionError, Error, Result};
use crate::messaging::*;
use crate::router::{Callbacks, ChannelRouter, Subscription};

pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(15_000);

#[derive(Clone, Debug)]
pub struct ConnectionOptions {
    /// Prefix of generated client identities, `<prefix>-<uuid>`
    pub client_prefix: String,
    pub timeout: Duration,
    /// Channels whose inbound messages are routed to callbacks
    pub inbound: Vec<Channel>,
}

impl ConnectionOptions {
    /// The presentation listens to everything the audience sends.
    pub fn presentation() -> Self {
        Self {
            client_prefix: "presentation".to_string(),
            timeout: DEFAULT_CONNECTION_TIMEOUT,
            inbound: vec![Channel::Avatars, Channel::Votes, Channel::Heartbeat],
        }
    }

    /// A vote app only listens to what the presentation broadcasts.
    pub fn audience() -> Self {
        Self {
            client_prefix: "pirate".to_string(),
            timeout: DEFAULT_CONNECTION_TIMEOUT,
            inbound: vec![Channel::Session],
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

struct Link {
    connection: Arc<dyn BrokerConnection>,
    router: ChannelRouter,
}

pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    options: ConnectionOptions,
    // Serializes connect attempts so a second caller sees the first one's outcome
    gate: Mutex<()>,
    link: watch::Sender<Option<Arc<Link>>>,
    connected: watch::Sender<bool>,
    identity: watch::Sender<Option<String>>,
    error: watch::Sender<Option<ConnectionError>>,
    callbacks: Callbacks,
}

macro_rules! typed_subscription {
    ($(#[$meta:meta])* $name:ident, $variant:ident, $payload:ty) => {
        $(#[$meta])*
        pub fn $name(
            &self,
            callback: impl Fn(&$payload) + Send + Sync + 'static,
        ) -> Subscription {
            self.on(MessageKind::$variant, move |message| {
                if let Message::$variant(payload) = message {
                    callback(payload);
                }
            })
        }
    };
}

impl ConnectionManager {
    pub fn new(broker: Arc<dyn Broker>, options: ConnectionOptions) -> Self {
        Self {
            broker,
            options,
            gate: Mutex::new(()),
            link: watch::channel(None).0,
            connected: watch::channel(false).0,
            identity: watch::channel(None).0,
            error: watch::channel(None).0,
            callbacks: Callbacks::new(),
        }
    }

    /// Open the connection, racing the broker's acknowledgement against the
    /// configured timeout. Calling this while connected does nothing.
    pub async fn connect(
        &self,
        api_key: &str,
        restore_id: Option<&str>,
    ) -> std::result::Result<(), ConnectionError> {
        let _gate = self.gate.lock().await;
        if self.link.borrow().is_some() {
            info!("Already connected");
            return Ok(());
        }

        let client_id = match restore_id {
            Some(id) => id.to_string(),
            None => format!("{}-{}", self.options.client_prefix, Uuid::new_v4()),
        };
        self.identity.send_replace(Some(client_id.clone()));

        let connection = self.broker.open(Credentials {
            api_key: Zeroizing::new(api_key.to_string()),
            client_id: client_id.clone(),
        });

        let connected = wait_until_connected(connection.state());
        let outcome = match tokio::time::timeout(self.options.timeout, connected).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(ConnectionError::Refused(reason)),
            Err(_) => Err(ConnectionError::Timeout {
                millis: self.options.timeout.as_millis() as u64,
            }),
        };

        if let Err(e) = outcome {
            error!("Connection error for {client_id}: {e}");
            self.identity.send_replace(None);
            self.error.send_replace(Some(e.clone()));
            return Err(e);
        }

        let router = ChannelRouter::new(connection.clone(), self.callbacks.clone());
        for channel in &self.options.inbound {
            router.listen(*channel);
        }

        self.link.send_replace(Some(Arc::new(Link { connection, router })));
        self.error.send_replace(None);
        self.connected.send_replace(true);
        info!("Connected as {client_id}");
        Ok(())
    }

    /// Close the connection and forget the identity, channel handles and
    /// every registered callback.
    pub fn disconnect(&self) {
        let link = match self.link.send_replace(None) {
            Some(link) => link,
            None => return,
        };

        link.router.shutdown();
        link.connection.close();
        self.callbacks.clear();
        self.identity.send_replace(None);
        self.connected.send_replace(false);
        info!("Disconnected");
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// The error of the most recent failed connect, cleared by a success.
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.error.borrow().clone()
    }

    pub fn client_id(&self) -> Option<String> {
        self.identity.borrow().clone()
    }

    /// Adopt a previously used identity without announcing it again.
    pub fn restore_identity(&self, client_id: &str) {
        self.identity.send_replace(Some(client_id.to_string()));
        info!("Session restored for {client_id}");
    }

    /// Best-effort publish: when disconnected the message is dropped with
    /// a warning.
    pub async fn publish(&self, message: &Message) -> Result<()> {
        let link = self.link.borrow().clone();
        match link {
            Some(link) => link.router.publish(message).await,
            None => {
                warn!("Cannot publish {} - not connected", message.kind());
                Ok(())
            }
        }
    }

    /// Publish that requires a live connection.
    pub async fn send(&self, message: &Message) -> Result<()> {
        let link = self.link.borrow().clone();
        match link {
            Some(link) => link.router.publish(message).await,
            None => Err(Error::NotConnected),
        }
    }

    pub fn on(
        &self,
        kind: MessageKind,
        handler: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Subscription {
        self.callbacks.register(kind, Arc::new(handler))
    }

    typed_subscription!(on_avatar_created, AvatarCreated, AvatarCreatedMessage);
    typed_subscription!(on_vote_cast, VoteCast, VoteCastMessage);
    typed_subscription!(on_poll_cast, PollCast, PollCastMessage);
    typed_subscription!(on_heartbeat_response, HeartbeatResponse, HeartbeatResponseMessage);
    typed_subscription!(on_session_state, SessionState, SessionStateMessage);
    typed_subscription!(on_heartbeat_request, HeartbeatRequest, HeartbeatRequestMessage);
    typed_subscription!(on_vote_started, VoteStarted, VoteStartedMessage);
    typed_subscription!(on_vote_ended, VoteEnded, VoteEndedMessage);
    typed_subscription!(on_poll_started, PollStarted, PollStartedMessage);
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn wait_until_connected(
    mut state: watch::Receiver<LinkState>,
) -> std::result::Result<(), String> {
    loop {
        match &*state.borrow_and_update() {
            LinkState::Connected => return Ok(()),
            LinkState::Failed(reason) => return Err(reason.clone()),
            LinkState::Closed => return Err("connection closed while opening".to_string()),
            LinkState::Connecting => {}
        }

        if state.changed().await.is_err() {
            return Err("broker dropped the connection".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use tokio::sync::mpsc;

    fn manager(broker: &Arc<LocalBroker>, options: ConnectionOptions) -> ConnectionManager {
        ConnectionManager::new(broker.clone(), options)
    }

    #[tokio::test]
    async fn second_connect_reuses_the_connection() {
        let broker = Arc::new(LocalBroker::new("key"));
        let connection = manager(&broker, ConnectionOptions::audience());

        connection.connect("key", None).await.unwrap();
        let first_id = connection.client_id();
        connection.connect("key", None).await.unwrap();

        assert!(connection.is_connected());
        assert_eq!(broker.connections_opened(), 1);
        assert_eq!(connection.client_id(), first_id);
        assert!(first_id.unwrap().starts_with("pirate-"));
    }

    #[tokio::test]
    async fn refused_connection_records_the_error() {
        let broker = Arc::new(LocalBroker::new("key"));
        let connection = manager(&broker, ConnectionOptions::audience());

        let result = connection.connect("wrong", None).await;

        assert_eq!(result, Err(ConnectionError::Refused("invalid key".to_string())));
        assert_eq!(
            connection.last_error(),
            Some(ConnectionError::Refused("invalid key".to_string()))
        );
        assert!(!connection.is_connected());
        assert_eq!(connection.client_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_broker_times_out_after_fifteen_seconds() {
        let broker = Arc::new(LocalBroker::silent());
        let connection = manager(&broker, ConnectionOptions::audience());
        let started = tokio::time::Instant::now();

        let result = connection.connect("key", None).await;

        assert_eq!(result, Err(ConnectionError::Timeout { millis: 15_000 }));
        assert!(started.elapsed() >= Duration::from_millis(15_000));
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn restored_identity_is_used_as_client_id() {
        let broker = Arc::new(LocalBroker::new("key"));
        let connection = manager(&broker, ConnectionOptions::audience());

        connection.connect("key", Some("pirate-saved")).await.unwrap();
        assert_eq!(connection.client_id().as_deref(), Some("pirate-saved"));
    }

    #[tokio::test]
    async fn disconnect_clears_everything_and_is_idempotent() {
        let broker = Arc::new(LocalBroker::new("key"));
        let connection = manager(&broker, ConnectionOptions::presentation());
        let mut connected = connection.watch_connected();

        connection.connect("key", None).await.unwrap();
        assert!(*connected.borrow_and_update());
        let _subscription = connection.on_vote_cast(|_| {});

        connection.disconnect();
        connection.disconnect();

        assert!(!*connected.borrow_and_update());
        assert_eq!(connection.client_id(), None);
        assert!(connection.callbacks.is_empty());
    }

    #[tokio::test]
    async fn publishing_while_disconnected() {
        let broker = Arc::new(LocalBroker::new("key"));
        let connection = manager(&broker, ConnectionOptions::presentation());
        let message = Message::HeartbeatRequest(HeartbeatRequestMessage { timestamp: 1 });

        assert!(connection.publish(&message).await.is_ok());
        assert!(matches!(connection.send(&message).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn inbound_messages_reach_typed_callbacks() {
        let broker = Arc::new(LocalBroker::new("key"));
        let presentation = manager(&broker, ConnectionOptions::presentation());
        let audience = manager(&broker, ConnectionOptions::audience());
        presentation.connect("key", None).await.unwrap();
        audience.connect("key", None).await.unwrap();

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let _subscription = presentation.on_vote_cast(move |vote| {
            let _ = sender.send(vote.participant_id.clone());
        });

        // A raw malformed payload first; it must never reach the callback
        let raw = broker.open(Credentials {
            api_key: Zeroizing::new("key".to_string()),
            client_id: "raw".to_string(),
        });
        let malformed = serde_json::json!({"type": "vote-cast", "voteIndex": "0"});
        raw.channel(Channel::Votes.name())
            .publish(crate::broker::MESSAGE_EVENT, malformed)
            .await
            .unwrap();

        audience
            .send(&Message::VoteCast(VoteCastMessage {
                keynote_id: "k1".to_string(),
                participant_id: "p1".to_string(),
                vote_index: 0,
                choice: VoteChoice::B,
                timestamp: 1,
            }))
            .await
            .unwrap();

        assert_eq!(receiver.recv().await.as_deref(), Some("p1"));
        assert!(receiver.try_recv().is_err());
    }
}
