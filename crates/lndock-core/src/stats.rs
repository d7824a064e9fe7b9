use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::pool::SessionPool;

/// Periodic snapshot of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub active_sessions: usize,
}

/// Sink for pool snapshots. The daemon layers its metrics gauge on top of
/// the default log line.
pub trait StatsObserver: Send + Sync {
    fn record(&self, stats: PoolStats);
}

/// Default observer: one log line per tick.
#[derive(Debug, Default)]
pub struct LogStats;

impl StatsObserver for LogStats {
    fn record(&self, stats: PoolStats) {
        info!(active_sessions = stats.active_sessions, "session pool stats");
    }
}

impl SessionPool {
    /// Spawns the reporter ticker. The task holds only a weak reference to
    /// the pool and exits once the pool is gone.
    pub fn spawn_stats_reporter(&self, observer: Arc<dyn StatsObserver>) -> JoinHandle<()> {
        let shared = self.shared_weak();
        let period = self.config().stats_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let Some(shared) = shared.upgrade() else { return };
                observer.record(PoolStats {
                    active_sessions: shared.sessions.lock().len(),
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackMailbox;
    use crate::pool::PoolConfig;
    use crate::registry::MethodRegistry;
    use crate::session::Action;
    use crate::NodeDescriptor;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<usize>>,
    }

    impl StatsObserver for Recorder {
        fn record(&self, stats: PoolStats) {
            self.seen.lock().push(stats.active_sessions);
        }
    }

    #[tokio::test]
    async fn reporter_snapshots_the_session_count() {
        let mailbox = Arc::new(LoopbackMailbox::new());
        let registry = Arc::new(MethodRegistry::builder().passthrough("echo").build());
        let pool = SessionPool::new(
            mailbox,
            registry,
            PoolConfig {
                stats_interval: Duration::from_millis(20),
                ..PoolConfig::default()
            },
        );

        let recorder = Arc::new(Recorder::default());
        let handle = pool.spawn_stats_reporter(recorder.clone());

        let (action, rx) = Action::new("echo", "{}");
        pool.execute(&NodeDescriptor::new("wss://relay.example", "a b c d"), action)
            .await;
        rx.await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recorder.seen.lock().contains(&1));

        handle.abort();
    }
}
