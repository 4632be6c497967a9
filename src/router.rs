use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::broker::{BrokerChannel, BrokerConnection, MESSAGE_EVENT};
use crate::error::Result;
use crate::messaging::{self, Channel, Message, MessageKind};

pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    // Ids grow monotonically, so sorting by id gives registration order
    handlers: DashMap<u64, (MessageKind, Handler)>,
}

/// Subscriber lists per message kind, shared between a connection manager
/// and the router it builds on every connect.
#[derive(Clone, Default)]
pub struct Callbacks {
    registry: Arc<Registry>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: MessageKind, handler: Handler) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.handlers.insert(id, (kind, handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invoke every handler registered for the message's kind, in
    /// registration order. A panicking handler is logged and skipped.
    /// Returns how many handlers ran to completion.
    pub fn dispatch(&self, message: &Message) -> usize {
        let kind = message.kind();

        // Clone out of the map first so handlers may (un)subscribe freely
        let mut matching: Vec<(u64, Handler)> = self
            .registry
            .handlers
            .iter()
            .filter(|entry| entry.value().0 == kind)
            .map(|entry| (*entry.key(), entry.value().1.clone()))
            .collect();
        matching.sort_by_key(|(id, _)| *id);

        let mut completed = 0;
        for (id, handler) in matching {
            match catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!("Error in {kind} subscriber {id}: {reason}");
                }
            }
        }

        completed
    }

    pub fn len(&self) -> usize {
        self.registry.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.handlers.is_empty()
    }

    pub fn clear(&self) {
        self.registry.handlers.clear();
    }
}

/// Handle returned by every registration.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.handlers.remove(&self.id);
        }
    }
}

/// Typed access to the broker channels of one live connection.
pub struct ChannelRouter {
    connection: Arc<dyn BrokerConnection>,
    channels: DashMap<Channel, Arc<dyn BrokerChannel>>,
    listeners: DashMap<Channel, JoinHandle<()>>,
    callbacks: Callbacks,
}

impl ChannelRouter {
    pub fn new(connection: Arc<dyn BrokerConnection>, callbacks: Callbacks) -> Self {
        Self {
            connection,
            channels: DashMap::new(),
            listeners: DashMap::new(),
            callbacks,
        }
    }

    /// Resolve a channel handle, creating and caching it on first use.
    pub fn channel(&self, channel: Channel) -> Arc<dyn BrokerChannel> {
        self.channels
            .entry(channel)
            .or_insert_with(|| self.connection.channel(channel.name()))
            .value()
            .clone()
    }

    pub async fn publish(&self, message: &Message) -> Result<()> {
        let payload = message.to_payload()?;
        let channel = message.channel();

        self.channel(channel).publish(MESSAGE_EVENT, payload).await?;
        debug!("Published {} to {channel}", message.kind());
        Ok(())
    }

    /// Start feeding a channel's inbound payloads to the registered
    /// callbacks. Listening twice on the same channel is a no-op.
    pub fn listen(&self, channel: Channel) {
        if self.listeners.contains_key(&channel) {
            return;
        }

        let stream = self.channel(channel).subscribe();
        let handle = tokio::spawn(route_inbound(channel, stream, self.callbacks.clone()));
        self.listeners.insert(channel, handle);
        debug!("Listening on {channel}");
    }

    pub fn shutdown(&self) {
        for listener in self.listeners.iter() {
            listener.value().abort();
        }
        self.listeners.clear();
        self.channels.clear();
    }
}

impl Drop for ChannelRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn route_inbound(
    channel: Channel,
    mut stream: BoxStream<'static, Value>,
    callbacks: Callbacks,
) {
    while let Some(payload) = stream.next().await {
        route_payload(channel, &payload, &callbacks);
    }

    debug!("Stopped listening on {channel}");
}

/// Validate one inbound payload and hand it to the subscribers of its
/// kind. Invalid payloads, and payloads on a channel that does not carry
/// their kind, are logged and dropped.
pub fn route_payload(channel: Channel, payload: &Value, callbacks: &Callbacks) -> usize {
    let message = match messaging::validate(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping invalid message on {channel}: {e}");
            return 0;
        }
    };

    if !channel.carries(message.kind()) {
        warn!("Dropping {} received on {channel}", message.kind());
        return 0;
    }

    trace!("Routing {message}");
    callbacks.dispatch(&message)
}
