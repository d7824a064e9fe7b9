//! In-memory mailbox for tests and non-relay contexts.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use k256::SecretKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::macaroon::{Caveat, Macaroon};
use crate::transport::{DialRequest, DialedNode, MailboxTransport, NodeStream, TransportError};

/// Loopback transport: every dial "handshakes" instantly against a peer
/// whose static key is minted at construction, delivers a macaroon carrying
/// the configured `permissions` caveat, and hands back an echo stream.
///
/// The handshake counter lets tests observe session reuse and re-dials.
pub struct LoopbackMailbox {
    remote: SecretKey,
    caveats: Vec<String>,
    auth_override: Option<Vec<u8>>,
    handshakes: AtomicUsize,
}

impl LoopbackMailbox {
    pub fn new() -> Self {
        Self::with_permissions("*:*")
    }

    /// A mailbox whose minted macaroon grants the given comma-separated
    /// `entity:action` list.
    pub fn with_permissions(permissions: &str) -> Self {
        Self {
            remote: SecretKey::random(&mut OsRng),
            caveats: vec![format!("permissions = {permissions}")],
            auth_override: None,
            handshakes: AtomicUsize::new(0),
        }
    }

    /// A mailbox that delivers a raw auth payload instead of a minted
    /// macaroon, for exercising the handshake's auth-data validation.
    pub fn with_auth_data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            auth_override: Some(data.into()),
            ..Self::new()
        }
    }

    /// Number of completed handshakes since construction.
    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    fn mint_macaroon(&self, mailbox: &str) -> Macaroon {
        let identifier = format!("lndock {mailbox}").into_bytes();
        let mut hasher = Sha256::new();
        hasher.update(&identifier);
        for caveat in &self.caveats {
            hasher.update(caveat.as_bytes());
        }
        Macaroon {
            location: Some(mailbox.as_bytes().to_vec()),
            identifier,
            caveats: self
                .caveats
                .iter()
                .map(|text| Caveat::first_party(text.as_bytes()))
                .collect(),
            signature: hasher.finalize().to_vec(),
        }
    }
}

impl Default for LoopbackMailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailboxTransport for LoopbackMailbox {
    async fn dial(&self, request: DialRequest) -> Result<DialedNode, TransportError> {
        if request.mailbox.is_empty() {
            return Err(TransportError::Dial("empty mailbox address".into()));
        }
        self.handshakes.fetch_add(1, Ordering::SeqCst);

        let auth_data = match &self.auth_override {
            Some(data) => data.clone(),
            None => {
                let macaroon = self.mint_macaroon(&request.mailbox);
                format!("Macaroon: {}", hex::encode(macaroon.encode())).into_bytes()
            }
        };

        Ok(DialedNode {
            remote_key: self.remote.public_key(),
            auth_data,
            stream: Arc::new(LoopbackStream {
                closed: AtomicBool::new(false),
            }),
        })
    }
}

/// Echo stream: each call answers with its own payload.
struct LoopbackStream {
    closed: AtomicBool,
}

#[async_trait]
impl NodeStream for LoopbackStream {
    fn status(&self) -> String {
        if self.closed.load(Ordering::SeqCst) {
            "Closed".to_string()
        } else {
            "Connected".to_string()
        }
    }

    async fn call(&self, _method: &str, payload: &str) -> Result<String, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::StreamClosed);
        }
        Ok(payload.to_string())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
