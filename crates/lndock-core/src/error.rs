use thiserror::Error;

use crate::transport::TransportError;

/// Failures surfaced to the caller of [`SessionPool::execute`].
///
/// Every variant is delivered through the action's reply channel; the pool
/// never retries internally apart from the single admission retry.
///
/// [`SessionPool::execute`]: crate::pool::SessionPool::execute
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid key material: {0}")]
    BadKey(String),

    #[error("auth data does not contain a macaroon: {0}")]
    BadAuthData(String),

    #[error("handshake failed: {0}")]
    Handshake(#[from] TransportError),

    #[error("too many active connections")]
    TooManyConnections,

    #[error("invalid permission {0:?}: expected entity:action")]
    BadPermission(String),

    #[error("invalid action payload: {0}")]
    InvalidPayload(String),

    #[error("rpc method failed: {0}")]
    Rpc(String),
}
