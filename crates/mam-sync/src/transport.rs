//! The connection boundary the sync engine and dispatcher send through.

use std::time::Duration;

use async_trait::async_trait;
use stanza_model::Element;
use thiserror::Error;

/// Errors reported by a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No route to recipient")]
    NoRoute,

    #[error("Not connected")]
    NotConnected,

    #[error("Request timed out")]
    Timeout,

    /// The server answered with an error stanza.
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// True for conditions that clear up on reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::NoRoute | TransportError::NotConnected)
    }
}

/// A connected stream for one account.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a stanza without waiting for an answer.
    async fn send(&self, stanza: Element) -> Result<(), TransportError>;

    /// Send an iq and wait for its response.
    async fn request(&self, stanza: Element, timeout: Duration) -> Result<Element, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_routing_errors_are_transient() {
        assert!(TransportError::NoRoute.is_transient());
        assert!(TransportError::NotConnected.is_transient());
        assert!(!TransportError::Timeout.is_transient());
        assert!(!TransportError::Rejected("forbidden".into()).is_transient());
        assert!(!TransportError::Other("boom".into()).is_transient());
    }
}
