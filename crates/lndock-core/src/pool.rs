use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::descriptor::{NodeDescriptor, SessionKey};
use crate::error::PoolError;
use crate::registry::MethodRegistry;
use crate::session::{Action, Session};
use crate::transport::MailboxTransport;

/// Immutable pool configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of concurrently live sessions.
    pub max_sessions: usize,
    /// A session whose queue has been empty across one full window is
    /// closed.
    pub idle_timeout: Duration,
    /// How long a request waits before its single admission retry.
    pub admission_retry: Duration,
    /// Period of the stats reporter.
    pub stats_interval: Duration,
    /// Never enable outside development: logs key material.
    pub log_secrets: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 210,
            idle_timeout: Duration::from_secs(5 * 60),
            admission_retry: Duration::from_secs(1),
            stats_interval: Duration::from_secs(60),
            log_secrets: false,
        }
    }
}

/// Admission-controlled cache of live sessions, keyed by
/// `(mailbox, pairing_phrase)`.
///
/// Cheaply cloneable; clones share the same session table.
#[derive(Clone)]
pub struct SessionPool {
    shared: Arc<PoolShared>,
}

pub(crate) struct PoolShared {
    pub(crate) sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
    transport: Arc<dyn MailboxTransport>,
    registry: Arc<MethodRegistry>,
    pub(crate) config: PoolConfig,
}

enum Plan {
    Enqueue(Arc<Session>),
    Full,
    Dial,
}

enum Install {
    Installed,
    Lost(Arc<Session>),
    Full,
}

impl SessionPool {
    pub fn new(
        transport: Arc<dyn MailboxTransport>,
        registry: Arc<MethodRegistry>,
        config: PoolConfig,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                sessions: Mutex::new(HashMap::new()),
                transport,
                registry,
                config,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Routes one action to the session for `descriptor`, creating the
    /// session on first use. Returns once the action has been handed off to
    /// a dispatch loop, or after a terminal error has been delivered
    /// through the action's reply channel.
    ///
    /// The pool lock is held only around table lookups and installs, never
    /// across the handshake or a queue send.
    pub async fn execute(&self, descriptor: &NodeDescriptor, action: Action) {
        let key = descriptor.session_key();
        let mut action = action;
        let mut retried_admission = false;

        loop {
            let plan = {
                let sessions = self.shared.sessions.lock();
                if let Some(session) = sessions.get(&key) {
                    Plan::Enqueue(session.clone())
                } else if sessions.len() >= self.shared.config.max_sessions {
                    Plan::Full
                } else {
                    Plan::Dial
                }
            };

            match plan {
                Plan::Enqueue(session) => {
                    debug!(mailbox = %descriptor.mailbox, "reusing existing session");
                    match session.enqueue(action).await {
                        Ok(()) => return,
                        Err(returned) => {
                            // Evicted between lookup and send; route against
                            // a fresh view of the table.
                            debug!(mailbox = %descriptor.mailbox, "session drained during enqueue");
                            action = returned;
                        }
                    }
                }

                Plan::Full => {
                    if retried_admission {
                        warn!(
                            limit = self.shared.config.max_sessions,
                            "session table still full; rejecting request"
                        );
                        action.fail(PoolError::TooManyConnections);
                        return;
                    }
                    retried_admission = true;
                    info!(
                        limit = self.shared.config.max_sessions,
                        "session table full; retrying admission"
                    );
                    tokio::time::sleep(self.shared.config.admission_retry).await;
                }

                Plan::Dial => {
                    info!(mailbox = %descriptor.mailbox, "opening new session");
                    if self.shared.config.log_secrets {
                        debug!(?descriptor, "dialing with descriptor");
                    }
                    let connected = Session::connect(
                        descriptor.clone(),
                        self.shared.transport.as_ref(),
                        self.shared.registry.clone(),
                        self.shared.config.log_secrets,
                    )
                    .await;

                    let (session, dispatch) = match connected {
                        Ok(connected) => connected,
                        Err(err) => {
                            action.fail(err);
                            return;
                        }
                    };
                    let session = Arc::new(session);

                    let install = {
                        let mut sessions = self.shared.sessions.lock();
                        if let Some(existing) = sessions.get(&key) {
                            Install::Lost(existing.clone())
                        } else if sessions.len() >= self.shared.config.max_sessions {
                            Install::Full
                        } else {
                            sessions.insert(key.clone(), session.clone());
                            Install::Installed
                        }
                    };

                    match install {
                        Install::Installed => {
                            tokio::spawn(dispatch.run());
                            self.spawn_idle_timer(key.clone(), &session);
                            match session.enqueue(action).await {
                                Ok(()) => return,
                                Err(returned) => action = returned,
                            }
                        }
                        Install::Lost(existing) => {
                            // Another worker handshook the same key first;
                            // discard the fresh session and use the winner.
                            debug!(mailbox = %descriptor.mailbox, "lost session creation race");
                            session.close().await;
                            drop(dispatch);
                            match existing.enqueue(action).await {
                                Ok(()) => return,
                                Err(returned) => action = returned,
                            }
                        }
                        Install::Full => {
                            session.close().await;
                            drop(dispatch);
                            if retried_admission {
                                action.fail(PoolError::TooManyConnections);
                                return;
                            }
                            retried_admission = true;
                            tokio::time::sleep(self.shared.config.admission_retry).await;
                        }
                    }
                }
            }
        }
    }

    /// Closes every session. Used on daemon shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.shared.sessions.lock();
            sessions.drain().map(|(_, session)| session).collect()
        };
        let count = drained.len();
        for session in drained {
            session.close().await;
        }
        info!(closed = count, "session pool shut down");
    }

    pub(crate) fn shared_weak(&self) -> Weak<PoolShared> {
        Arc::downgrade(&self.shared)
    }

    /// Arms the idle timer for a freshly installed session. The task holds
    /// only weak references, so it cannot keep the pool or the session
    /// alive, and it exits once its session has been replaced or removed.
    fn spawn_idle_timer(&self, key: SessionKey, session: &Arc<Session>) {
        let shared = Arc::downgrade(&self.shared);
        let session = Arc::downgrade(session);
        let window = self.shared.config.idle_timeout;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(window).await;
                let Some(shared) = shared.upgrade() else { return };
                let Some(target) = session.upgrade() else { return };

                let evicted = {
                    let mut sessions = shared.sessions.lock();
                    match sessions.get(&key) {
                        Some(current) if Arc::ptr_eq(current, &target) => {
                            if target.queue_is_empty() {
                                sessions.remove(&key);
                                true
                            } else {
                                // Still busy: sleep another full window.
                                false
                            }
                        }
                        // Replaced or already gone; this timer is stale.
                        _ => return,
                    }
                };

                if evicted {
                    info!(
                        remote_key = %target.descriptor().remote_key,
                        "closing idle session"
                    );
                    target.close().await;
                    return;
                }
            }
        });
    }
}
