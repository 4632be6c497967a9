use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use zeroize::Zeroizing;

use super::{Broker, BrokerChannel, BrokerConnection, Credentials, LinkState};
use crate::error::BrokerError;

struct Subscriber {
    connection: u64,
    sender: mpsc::UnboundedSender<Value>,
}

// Channel name to every open subscription on it, across all connections
type Topics = Arc<DashMap<String, Vec<Subscriber>>>;

#[derive(Clone, Copy, Debug)]
enum Acknowledgement {
    Immediate,
    Never,
}

/// In-process broker. Connections opened with the configured key are
/// acknowledged straight away, anything else fails the way a hosted
/// broker reports a bad key.
pub struct LocalBroker {
    api_key: Zeroizing<String>,
    acknowledgement: Acknowledgement,
    topics: Topics,
    next_connection: AtomicU64,
    opened: AtomicUsize,
}

impl LocalBroker {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_acknowledgement(api_key.into(), Acknowledgement::Immediate)
    }

    /// A broker that accepts connections but never reports them as
    /// connected or failed.
    pub fn silent() -> Self {
        Self::with_acknowledgement(String::new(), Acknowledgement::Never)
    }

    fn with_acknowledgement(api_key: String, acknowledgement: Acknowledgement) -> Self {
        Self {
            api_key: Zeroizing::new(api_key),
            acknowledgement,
            topics: Arc::new(DashMap::new()),
            next_connection: AtomicU64::new(0),
            opened: AtomicUsize::new(0),
        }
    }

    /// How many connections have been opened against this broker.
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

impl Broker for LocalBroker {
    fn open(&self, credentials: Credentials) -> Arc<dyn BrokerConnection> {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.opened.fetch_add(1, Ordering::Relaxed);

        let (state, _) = watch::channel(LinkState::Connecting);
        match self.acknowledgement {
            Acknowledgement::Never => {
                debug!(
                    "{} is waiting for an acknowledgement that never comes",
                    credentials.client_id
                )
            }
            Acknowledgement::Immediate if *credentials.api_key == *self.api_key => {
                debug!("Accepted connection {id} for {}", credentials.client_id);
                state.send_replace(LinkState::Connected);
            }
            Acknowledgement::Immediate => {
                warn!("Rejected connection for {}: invalid key", credentials.client_id);
                state.send_replace(LinkState::Failed("invalid key".to_string()));
            }
        }

        Arc::new(LocalConnection {
            id,
            state,
            topics: self.topics.clone(),
        })
    }
}

struct LocalConnection {
    id: u64,
    state: watch::Sender<LinkState>,
    topics: Topics,
}

impl BrokerConnection for LocalConnection {
    fn state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    fn channel(&self, name: &str) -> Arc<dyn BrokerChannel> {
        Arc::new(LocalChannel {
            name: name.to_string(),
            connection: self.id,
            state: self.state.subscribe(),
            topics: self.topics.clone(),
        })
    }

    fn close(&self) {
        if self.state.send_replace(LinkState::Closed) == LinkState::Closed {
            return;
        }

        // Dropping the senders ends every subscription stream of this connection
        for mut subscribers in self.topics.iter_mut() {
            subscribers.retain(|subscriber| subscriber.connection != self.id);
        }
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        self.close();
    }
}

struct LocalChannel {
    name: String,
    connection: u64,
    state: watch::Receiver<LinkState>,
    topics: Topics,
}

impl BrokerChannel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, event: &str, payload: Value) -> BoxFuture<'static, Result<(), BrokerError>> {
        let result = match &*self.state.borrow() {
            LinkState::Connected => {
                trace!("Fanning out {event} on {}", self.name);
                if let Some(mut subscribers) = self.topics.get_mut(&self.name) {
                    subscribers
                        .retain(|subscriber| subscriber.sender.send(payload.clone()).is_ok());
                }
                Ok(())
            }
            LinkState::Closed => Err(BrokerError::Closed),
            other => Err(BrokerError::Rejected(format!("connection is {other:?}"))),
        };

        future::ready(result).boxed()
    }

    fn subscribe(&self) -> BoxStream<'static, Value> {
        let (sender, receiver) = mpsc::unbounded_channel();

        if *self.state.borrow() != LinkState::Closed {
            self.topics
                .entry(self.name.clone())
                .or_default()
                .push(Subscriber {
                    connection: self.connection,
                    sender,
                });
        }

        UnboundedReceiverStream::new(receiver).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credentials(key: &str) -> Credentials {
        Credentials {
            api_key: Zeroizing::new(key.to_string()),
            client_id: "pirate-test".to_string(),
        }
    }

    #[tokio::test]
    async fn delivers_in_publish_order_to_every_subscriber() {
        let broker = LocalBroker::new("key");
        let publisher = broker.open(credentials("key"));
        let listener = broker.open(credentials("key"));

        let mut first = listener.channel("lighthouse:votes").subscribe();
        let mut second = publisher.channel("lighthouse:votes").subscribe();

        let channel = publisher.channel("lighthouse:votes");
        channel.publish("message", json!({"n": 1})).await.unwrap();
        channel.publish("message", json!({"n": 2})).await.unwrap();

        assert_eq!(first.next().await, Some(json!({"n": 1})));
        assert_eq!(first.next().await, Some(json!({"n": 2})));
        assert_eq!(second.next().await, Some(json!({"n": 1})));
        assert_eq!(second.next().await, Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let broker = LocalBroker::new("key");
        let connection = broker.open(credentials("key"));
        let mut votes = connection.channel("lighthouse:votes").subscribe();

        connection
            .channel("lighthouse:avatars")
            .publish("message", json!({"n": 1}))
            .await
            .unwrap();
        connection
            .channel("lighthouse:votes")
            .publish("message", json!({"n": 2}))
            .await
            .unwrap();

        assert_eq!(votes.next().await, Some(json!({"n": 2})));
    }

    #[test]
    fn invalid_key_fails_the_connection() {
        let broker = LocalBroker::new("key");
        let connection = broker.open(credentials("nope"));
        assert_eq!(
            *connection.state().borrow(),
            LinkState::Failed("invalid key".to_string())
        );
    }

    #[test]
    fn silent_broker_stays_connecting() {
        let broker = LocalBroker::silent();
        let connection = broker.open(credentials(""));
        assert_eq!(*connection.state().borrow(), LinkState::Connecting);
        assert_eq!(broker.connections_opened(), 1);
    }

    #[tokio::test]
    async fn closing_ends_streams_and_refuses_publishes() {
        let broker = LocalBroker::new("key");
        let connection = broker.open(credentials("key"));
        let channel = connection.channel("lighthouse:session");
        let mut stream = channel.subscribe();

        connection.close();

        assert_eq!(stream.next().await, None);
        assert_eq!(
            channel.publish("message", json!({})).await,
            Err(BrokerError::Closed)
        );
    }
}
