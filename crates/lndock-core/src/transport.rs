use std::sync::Arc;

use async_trait::async_trait;
use k256::{PublicKey, SecretKey};
use thiserror::Error;

/// Failures surfaced by a mailbox transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mailbox dial failed: {0}")]
    Dial(String),
    #[error("stream closed")]
    StreamClosed,
    #[error("transport failure: {0}")]
    Other(String),
}

/// Input to one handshake attempt against a mailbox relay.
pub struct DialRequest {
    pub mailbox: String,
    pub pairing_phrase: String,
    pub local_key: SecretKey,
    /// Present when the caller already knows the peer's static key; the
    /// transport pins the handshake to it.
    pub remote_key: Option<PublicKey>,
}

/// Everything a completed handshake yields: the peer's static key as
/// learned during the exchange, the authorization payload the peer
/// delivered, and the live stream.
pub struct DialedNode {
    pub remote_key: PublicKey,
    pub auth_data: Vec<u8>,
    pub stream: Arc<dyn NodeStream>,
}

/// Externally-supplied dialer that performs the mailbox handshake.
#[async_trait]
pub trait MailboxTransport: Send + Sync {
    async fn dial(&self, request: DialRequest) -> Result<DialedNode, TransportError>;
}

/// Opaque multiplexed stream to the remote node, owned by exactly one
/// session.
#[async_trait]
pub trait NodeStream: Send + Sync {
    /// Current transport status, e.g. `"Connected"`.
    fn status(&self) -> String;

    /// Send one serialized request and wait for its serialized response.
    async fn call(&self, method: &str, payload: &str) -> Result<String, TransportError>;

    /// Tear down the underlying connection. Idempotent.
    async fn close(&self);
}
