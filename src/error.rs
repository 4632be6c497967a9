use thiserror::Error;

/// Why a connection attempt to the broker did not succeed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection timeout after {millis}ms")]
    Timeout { millis: u64 },
    #[error("Broker refused the connection: {0}")]
    Refused(String),
}

/// Failures reported by a broker channel or connection handle.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("connection to the broker is closed")]
    Closed,
    #[error("broker rejected the operation: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("Not connected to the broker")]
    NotConnected,
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("Could not encode outgoing message: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
