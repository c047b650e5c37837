use crate::store::CoreSession;
use diagnostics::*;
use polylog::WriterId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Idle time after which a lingering session is closed
pub const LINGER_TIME: Duration = Duration::from_secs(30);

struct Pooled {
    session: CoreSession,
    /// `None` keeps the session until `clear`
    expires: Option<Instant>,
}

/// Keeps content core sessions open between accesses
///
/// Entries carry an expiry timestamp instead of a timer. Expired entries are
/// dropped lazily on access and by `sweep`, which a background task can run
/// periodically via `spawn_sweeper`.
pub struct CorePool {
    linger: Duration,
    entries: Mutex<HashMap<WriterId, Pooled>>,
}

impl Default for CorePool {
    fn default() -> Self {
        Self::new(LINGER_TIME)
    }
}

impl CorePool {
    pub fn new(linger: Duration) -> Self {
        Self {
            linger,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session for `writer`. With `keep_open` it stays until
    /// `clear`, otherwise it is closed after the linger time without access.
    /// A writer that is already pooled keeps its existing session.
    pub async fn linger(&self, writer: WriterId, session: CoreSession, keep_open: bool) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, now);
        if entries.contains_key(&writer) {
            return;
        }
        let expires = (!keep_open).then(|| now + self.linger);
        debug!("pooling core of {writer}, keep open {keep_open}", writer: writer.to_hex(), keep_open);
        _ = entries.insert(writer, Pooled { session, expires });
    }

    /// A new session onto the pooled core of `writer`. Refreshes its expiry.
    pub async fn get(&self, writer: &WriterId) -> Option<CoreSession> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, now);
        let pooled = entries.get_mut(writer)?;
        if pooled.expires.is_some() {
            pooled.expires = Some(now + self.linger);
        }
        Some(pooled.session.clone())
    }

    pub async fn contains(&self, writer: &WriterId) -> bool {
        self.entries.lock().await.contains_key(writer)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close expired sessions. Returns how many were closed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().await;
        Self::evict_expired(&mut entries, Instant::now())
    }

    /// Close every pooled session
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        let count = entries.len();
        entries.clear();
        debug!("cleared {count} pooled cores", count);
    }

    /// Run `sweep` every `every` until the pool is dropped
    pub fn spawn_sweeper(pool: &Arc<CorePool>, every: Duration) -> JoinHandle<()> {
        let pool: Weak<CorePool> = Arc::downgrade(pool);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                _ = interval.tick().await;
                let Some(pool) = pool.upgrade() else { break };
                _ = pool.sweep().await;
            }
        })
    }

    fn evict_expired(entries: &mut HashMap<WriterId, Pooled>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|writer, pooled| {
            let alive = pooled.expires.is_none_or(|at| at > now);
            if !alive {
                debug!("closing idle core of {writer}", writer: writer.to_hex());
            }
            alive
        });
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::content_key;
    use crate::store::ContentStore;

    async fn session(store: &ContentStore, writer: &WriterId) -> CoreSession {
        store.open(content_key(writer)).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_linger_expires_after_idle_time() {
        let store = ContentStore::new();
        let writer = WriterId::random();
        let pool = CorePool::default();

        let s = session(&store, &writer).await;
        let held = s.clone();
        pool.linger(writer, s, false).await;
        assert_eq!(held.sessions(), 2);

        tokio::time::advance(Duration::from_secs(20)).await;
        // access refreshes the expiry
        drop(pool.get(&writer).await.unwrap());
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(pool.sweep().await, 0);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(pool.sweep().await, 1);
        assert!(pool.get(&writer).await.is_none());
        assert_eq!(held.sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_open_survives_until_clear() {
        let store = ContentStore::new();
        let writer = WriterId::random();
        let pool = CorePool::default();
        pool.linger(writer, session(&store, &writer).await, true).await;

        // a second linger for the same writer is ignored
        pool.linger(writer, session(&store, &writer).await, false).await;
        assert_eq!(pool.len().await, 1);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(pool.sweep().await, 0);
        assert!(pool.get(&writer).await.is_some());

        pool.clear().await;
        assert!(pool.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_evicts() {
        let store = ContentStore::new();
        let writer = WriterId::random();
        let pool = Arc::new(CorePool::new(Duration::from_secs(5)));
        let sweeper = CorePool::spawn_sweeper(&pool, Duration::from_secs(1));
        pool.linger(writer, session(&store, &writer).await, false).await;

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(!pool.contains(&writer).await);
        sweeper.abort();
    }
}
