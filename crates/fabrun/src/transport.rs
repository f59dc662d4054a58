//! # Transports
//!
//! Moves encoded call envelopes to one replica and brings the reply back.
//! A transport sees opaque bytes only; components, methods, and routing keys
//! are the stub's business.
//!
//! The one thing a transport must get right is failure reporting. A request
//! that provably never left this process is `Unreachable`, and only then may
//! the client retry it on another replica.

/// Delivery failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The replica could not be contacted; the payload was never delivered.
    #[error("Replica unreachable: {0}")]
    Unreachable(String),
    /// The connection dropped after the payload may have been delivered.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    /// No reply arrived in time; the replica may have executed the call.
    #[error("Request timed out")]
    Timeout,
    #[error("Payload too large for transport")]
    PayloadTooLarge,
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Returns true if retrying the request on another replica cannot cause
    /// a duplicate execution.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Request/reply byte channel to one replica, shared as `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Returns the raw reply bytes. `Unreachable` is reserved for payloads
    /// that were never delivered.
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>>;
}
