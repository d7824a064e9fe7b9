//! Session-pool core for bridging JSON RPC actions onto mailbox-relayed,
//! end-to-end-encrypted streams to remote Lightning nodes.
//!
//! The pool caches one live session per `(mailbox, pairing phrase)` pair,
//! handshaking on first use, serializing actions per session through a
//! single-slot queue, and evicting sessions that sit idle. The mailbox
//! transport and the per-method wire marshaling are supplied by the caller
//! through the [`transport::MailboxTransport`] and
//! [`registry::MethodInvoker`] seams.

pub mod descriptor;
pub mod error;
pub mod keys;
pub mod loopback;
pub mod macaroon;
pub mod perms;
pub mod pool;
pub mod registry;
pub mod session;
pub mod stats;
pub mod transport;

pub use descriptor::{NodeDescriptor, SessionKey};
pub use error::PoolError;
pub use pool::{PoolConfig, SessionPool};
pub use registry::{MethodInvoker, MethodRegistry, PassthroughInvoker};
pub use session::{Action, ActionResponse, ActionResult, CHECK_PERMS_METHOD};
pub use stats::{LogStats, PoolStats, StatsObserver};
pub use transport::{DialRequest, DialedNode, MailboxTransport, NodeStream, TransportError};
