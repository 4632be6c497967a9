//! Seams for the hosted publish/subscribe service both apps talk through.
//!
//! Nothing in the crate knows which broker it is connected to. A broker
//! hands out connections, a connection hands out named channels, and a
//! channel can publish JSON payloads and stream the payloads published on
//! it. The only guarantee relied upon is per-channel delivery order.

mod local;

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::BrokerError;

pub use local::LocalBroker;

/// Event name every message is published under.
pub const MESSAGE_EVENT: &str = "message";

/// Lifecycle of a single broker connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Failed(String),
    Closed,
}

/// What a client presents when opening a connection.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: zeroize::Zeroizing<String>,
    pub client_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

pub trait Broker: Send + Sync {
    /// Start opening a connection. The returned handle reports progress
    /// through [`BrokerConnection::state`]; opening never blocks.
    fn open(&self, credentials: Credentials) -> Arc<dyn BrokerConnection>;
}

pub trait BrokerConnection: Send + Sync {
    fn state(&self) -> watch::Receiver<LinkState>;

    fn channel(&self, name: &str) -> Arc<dyn BrokerChannel>;

    fn close(&self);
}

pub trait BrokerChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Resolves once the broker acknowledged the payload.
    fn publish(&self, event: &str, payload: Value) -> BoxFuture<'static, Result<(), BrokerError>>;

    /// Every payload published on this channel from now on, in order.
    /// The stream ends when the owning connection closes.
    fn subscribe(&self) -> BoxStream<'static, Value>;
}
