#[macro_use]
extern crate log;

pub mod audience;
pub mod authentication;
pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod messaging;
pub mod persistence;
pub mod presentation;
pub mod processor;
pub mod router;
pub mod ws;

use std::time::{SystemTime, UNIX_EPOCH};

pub use audience::CrewClient;
pub use connection::{ConnectionManager, ConnectionOptions};
pub use error::{ConnectionError, Error};
pub use presentation::{PresentationHost, SessionStore};

/// Milliseconds since the Unix epoch, the unit of every wire timestamp.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
