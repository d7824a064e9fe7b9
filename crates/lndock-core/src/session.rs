use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::descriptor::NodeDescriptor;
use crate::error::PoolError;
use crate::keys::{encode_public, encode_secret, parse_keys};
use crate::macaroon::Macaroon;
use crate::perms::PermissionManager;
use crate::registry::MethodRegistry;
use crate::transport::{DialRequest, MailboxTransport, NodeStream};

/// Built-in method answered from the session's cached capability set
/// instead of the remote node.
pub const CHECK_PERMS_METHOD: &str = "checkPerms";

/// One slot, one consumer: enqueueing blocks the producer until the
/// dispatch loop has drained the previous action.
const ACTION_QUEUE_DEPTH: usize = 1;

/// Successful completion of an action: the finalized descriptor plus the
/// serialized result.
#[derive(Debug, Clone)]
pub struct ActionResponse {
    pub descriptor: NodeDescriptor,
    pub result: String,
}

pub type ActionResult = Result<ActionResponse, PoolError>;

/// One unit of work for a session. The reply channel consumes the action on
/// delivery, so exactly one of response/error is produced exactly once; an
/// action dropped without either (unknown method) closes the channel with
/// no value.
pub struct Action {
    method: String,
    payload: String,
    reply: oneshot::Sender<ActionResult>,
}

impl Action {
    pub fn new(
        method: impl Into<String>,
        payload: impl Into<String>,
    ) -> (Self, oneshot::Receiver<ActionResult>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                method: method.into(),
                payload: payload.into(),
                reply,
            },
            rx,
        )
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub(crate) fn respond(self, descriptor: NodeDescriptor, result: String) {
        let _ = self.reply.send(Ok(ActionResponse { descriptor, result }));
    }

    pub(crate) fn fail(self, err: PoolError) {
        let _ = self.reply.send(Err(err));
    }
}

/// One live peer connection: the finalized descriptor, the stream, and the
/// sending half of the action queue. The receiving half lives in the
/// [`DispatchLoop`] the pool spawns after installing the session.
pub struct Session {
    descriptor: NodeDescriptor,
    actions: mpsc::Sender<Action>,
    stream: Arc<dyn NodeStream>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Performs the first-use handshake: parse keys, dial, validate the
    /// delivered auth data, probe status, derive the capability set. The
    /// descriptor comes back rewritten with the key material actually used.
    /// Nothing is retried; a failed construction leaves no session behind.
    pub(crate) async fn connect(
        mut descriptor: NodeDescriptor,
        transport: &dyn MailboxTransport,
        registry: Arc<MethodRegistry>,
        log_secrets: bool,
    ) -> Result<(Self, DispatchLoop), PoolError> {
        let keys = parse_keys(&descriptor.local_key, &descriptor.remote_key)?;
        descriptor.local_key = encode_secret(&keys.local);
        if log_secrets {
            debug!(local_key = %descriptor.local_key, "using local static key");
        }

        let dialed = transport
            .dial(DialRequest {
                mailbox: descriptor.mailbox.clone(),
                pairing_phrase: descriptor.pairing_phrase.clone(),
                local_key: keys.local,
                remote_key: keys.remote,
            })
            .await?;
        descriptor.remote_key = encode_public(&dialed.remote_key);

        let macaroon = parse_auth_data(&dialed.auth_data)?;
        descriptor.status = dialed.stream.status();
        let perms = PermissionManager::from_macaroon(&macaroon);

        let (actions, queue) = mpsc::channel(ACTION_QUEUE_DEPTH);
        let session = Self {
            descriptor: descriptor.clone(),
            actions,
            stream: dialed.stream.clone(),
        };
        let dispatch = DispatchLoop {
            descriptor,
            queue,
            stream: dialed.stream,
            registry,
            perms,
        };
        Ok((session, dispatch))
    }

    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    /// Backpressure send into the single-slot queue. On failure the action
    /// is handed back so the caller can re-route it.
    pub(crate) async fn enqueue(&self, action: Action) -> Result<(), Action> {
        self.actions.send(action).await.map_err(|err| err.0)
    }

    /// True when no action is waiting in the queue. An action already taken
    /// by the dispatch loop does not count toward the depth.
    pub(crate) fn queue_is_empty(&self) -> bool {
        self.actions.capacity() == self.actions.max_capacity()
    }

    /// Closes the stream. The queue drains and the dispatch loop exits once
    /// the pool's handle (the last sender) is dropped.
    pub(crate) async fn close(&self) {
        self.stream.close().await;
    }
}

/// The session's single consumer: dequeues actions FIFO and completes each
/// before taking the next.
pub(crate) struct DispatchLoop {
    descriptor: NodeDescriptor,
    queue: mpsc::Receiver<Action>,
    stream: Arc<dyn NodeStream>,
    registry: Arc<MethodRegistry>,
    perms: PermissionManager,
}

impl std::fmt::Debug for DispatchLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchLoop")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl DispatchLoop {
    pub(crate) async fn run(mut self) {
        while let Some(action) = self.queue.recv().await {
            if action.method() == CHECK_PERMS_METHOD {
                self.check_perms(action);
            } else {
                self.dispatch(action).await;
            }
        }
        debug!(mailbox = %self.descriptor.mailbox, "session dispatch loop drained");
    }

    /// Answers a JSON array of permission strings with a same-length JSON
    /// array of booleans from the cached capability set.
    fn check_perms(&self, action: Action) {
        debug!(payload = %action.payload(), "checking permissions");
        let requested: Vec<String> = match serde_json::from_str(action.payload()) {
            Ok(requested) => requested,
            Err(err) => return action.fail(PoolError::InvalidPayload(err.to_string())),
        };

        let mut allowed = Vec::with_capacity(requested.len());
        for perm in &requested {
            match self.perms.check(perm) {
                Ok(granted) => allowed.push(granted),
                Err(err) => return action.fail(err),
            }
        }

        match serde_json::to_string(&allowed) {
            Ok(result) => action.respond(self.descriptor.clone(), result),
            Err(err) => action.fail(PoolError::Rpc(err.to_string())),
        }
    }

    async fn dispatch(&self, action: Action) {
        let Some(invoker) = self.registry.get(action.method()) else {
            // Preserved quirk: an unregistered method produces no reply at
            // all; the action's channel closes with no value.
            warn!(method = %action.method(), "unknown rpc method; dropping request");
            return;
        };

        info!(method = %action.method(), "executing method");
        match invoker.invoke(self.stream.clone(), action.payload()).await {
            Ok(result) => action.respond(self.descriptor.clone(), result),
            Err(err) => action.fail(PoolError::Rpc(err.to_string())),
        }
    }
}

/// The peer must deliver its credential as `Macaroon: <hex>` during the
/// handshake; anything else fails the session.
fn parse_auth_data(data: &[u8]) -> Result<Macaroon, PoolError> {
    let text = std::str::from_utf8(data)
        .map_err(|_| PoolError::BadAuthData("payload is not utf-8".into()))?;
    let parts: Vec<&str> = text.split(": ").collect();
    if parts.len() != 2 || parts[0] != "Macaroon" {
        return Err(PoolError::BadAuthData("unrecognized payload shape".into()));
    }
    let raw = hex::decode(parts[1]).map_err(|err| PoolError::BadAuthData(err.to_string()))?;
    Macaroon::decode(&raw).map_err(|err| PoolError::BadAuthData(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackMailbox;
    use crate::registry::MethodInvoker;
    use crate::transport::TransportError;
    use async_trait::async_trait;

    fn descriptor() -> NodeDescriptor {
        NodeDescriptor::new("wss://relay.example", "a b c d")
    }

    fn echo_registry() -> Arc<MethodRegistry> {
        Arc::new(MethodRegistry::builder().passthrough("echo").build())
    }

    async fn connected(
        mailbox: &LoopbackMailbox,
        registry: Arc<MethodRegistry>,
    ) -> (Session, DispatchLoop) {
        Session::connect(descriptor(), mailbox, registry, false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connect_finalizes_the_descriptor() {
        let mailbox = LoopbackMailbox::new();
        let (session, _dispatch) = connected(&mailbox, echo_registry()).await;

        let descriptor = session.descriptor();
        assert_eq!(descriptor.local_key.len(), 64);
        assert_eq!(descriptor.remote_key.len(), 66);
        assert!(descriptor.remote_key.starts_with("02") || descriptor.remote_key.starts_with("03"));
        assert_eq!(descriptor.status, "Connected");
    }

    #[tokio::test]
    async fn connect_keeps_a_caller_supplied_local_key() {
        let mailbox = LoopbackMailbox::new();
        let minted = crate::keys::parse_keys("", "").unwrap();
        let local_hex = crate::keys::encode_secret(&minted.local);

        let mut desc = descriptor();
        desc.local_key = local_hex.clone();
        let (session, _dispatch) = Session::connect(desc, &mailbox, echo_registry(), false)
            .await
            .unwrap();
        assert_eq!(session.descriptor().local_key, local_hex);
    }

    #[tokio::test]
    async fn connect_rejects_non_macaroon_auth_data() {
        let mailbox = LoopbackMailbox::with_auth_data(&b"NotAMacaroon: deadbeef"[..]);
        let err = Session::connect(descriptor(), &mailbox, echo_registry(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::BadAuthData(_)));
    }

    #[tokio::test]
    async fn connect_rejects_undecodable_macaroon_hex() {
        let mailbox = LoopbackMailbox::with_auth_data(&b"Macaroon: nothex"[..]);
        let err = Session::connect(descriptor(), &mailbox, echo_registry(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::BadAuthData(_)));
    }

    #[tokio::test]
    async fn echo_action_round_trips_through_the_loop() {
        let mailbox = LoopbackMailbox::new();
        let (session, dispatch) = connected(&mailbox, echo_registry()).await;
        tokio::spawn(dispatch.run());

        let (action, rx) = Action::new("echo", r#"{"v":1}"#);
        session.enqueue(action).await.ok().unwrap();

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.result, r#"{"v":1}"#);
        assert_eq!(response.descriptor.status, "Connected");
    }

    #[tokio::test]
    async fn check_perms_preserves_length_and_order() {
        let mailbox = LoopbackMailbox::with_permissions("info:read,offchain:*");
        let (session, dispatch) = connected(&mailbox, echo_registry()).await;
        tokio::spawn(dispatch.run());

        let (action, rx) = Action::new(
            CHECK_PERMS_METHOD,
            r#"["info:read","offchain:send","onchain:read"]"#,
        );
        session.enqueue(action).await.ok().unwrap();

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.result, "[true,true,false]");
    }

    #[tokio::test]
    async fn check_perms_fails_on_unparsable_payload() {
        let mailbox = LoopbackMailbox::new();
        let (session, dispatch) = connected(&mailbox, echo_registry()).await;
        tokio::spawn(dispatch.run());

        let (action, rx) = Action::new(CHECK_PERMS_METHOD, "not json");
        session.enqueue(action).await.ok().unwrap();
        assert!(matches!(
            rx.await.unwrap().unwrap_err(),
            PoolError::InvalidPayload(_)
        ));

        let (action, rx) = Action::new(CHECK_PERMS_METHOD, r#"["no-colon"]"#);
        session.enqueue(action).await.ok().unwrap();
        assert!(matches!(
            rx.await.unwrap().unwrap_err(),
            PoolError::BadPermission(_)
        ));
    }

    #[tokio::test]
    async fn unknown_method_drops_the_action_without_a_reply() {
        let mailbox = LoopbackMailbox::new();
        let (session, dispatch) = connected(&mailbox, echo_registry()).await;
        tokio::spawn(dispatch.run());

        let (action, rx) = Action::new("no-such-method", "{}");
        session.enqueue(action).await.ok().unwrap();

        // The reply channel closes with no value ever sent.
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn failing_invoker_surfaces_as_rpc_error() {
        struct FailingInvoker;

        #[async_trait]
        impl MethodInvoker for FailingInvoker {
            async fn invoke(
                &self,
                _stream: Arc<dyn NodeStream>,
                _payload: &str,
            ) -> anyhow::Result<String> {
                Err(TransportError::StreamClosed.into())
            }
        }

        let registry = Arc::new(
            MethodRegistry::builder()
                .register("boom", Arc::new(FailingInvoker))
                .build(),
        );
        let mailbox = LoopbackMailbox::new();
        let (session, dispatch) = connected(&mailbox, registry).await;
        tokio::spawn(dispatch.run());

        let (action, rx) = Action::new("boom", "{}");
        session.enqueue(action).await.ok().unwrap();
        assert!(matches!(rx.await.unwrap().unwrap_err(), PoolError::Rpc(_)));
    }
}
