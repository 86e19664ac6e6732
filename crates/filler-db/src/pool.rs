use crate::{DatabaseError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Opens, checks and closes the connections a [`ConnectionPool`] hands out
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection>;

    /// Cheap liveness check run on every checkout
    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<()>;

    /// Whether the handle must not go back to the pool: already closed, or
    /// released with a transaction still open
    fn has_broken(&self, conn: &Self::Connection) -> bool;

    async fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections opened when the pool is created
    pub min_connections: u32,
    /// Hard cap on live connections
    pub max_connections: u32,
    /// Checkout attempts before giving up
    pub acquire_attempts: u32,
    /// Wait after the first failed checkout; doubles per attempt
    pub acquire_backoff_base: Duration,
    /// Longest wait for a free slot
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.acquire_backoff_base
            .saturating_mul(2u32.checked_pow(attempt).unwrap_or(u32::MAX))
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 4,
            acquire_attempts: 5,
            acquire_backoff_base: Duration::from_millis(100),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently open, idle or checked out
    pub live: u32,
    pub idle: usize,
    pub max_connections: u32,
}

struct SharedPool<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    idle: Mutex<Vec<M::Connection>>,
    /// One permit per connection that may be checked out
    slots: Arc<Semaphore>,
    live: AtomicU32,
    closed: AtomicBool,
}

impl<M: ManageConnection> SharedPool<M> {
    fn discard(&self, conn: M::Connection, reason: &'static str) {
        drop(conn);
        self.live.fetch_sub(1, Ordering::SeqCst);
        filler_metrics::counters::pool_discarded(1);
        debug!(reason, "Discarded pooled connection");
        self.publish();
    }

    fn put_back(&self, conn: M::Connection, broken: bool) {
        if broken || self.manager.has_broken(&conn) {
            self.discard(conn, "broken");
            return;
        }
        if self.closed.load(Ordering::SeqCst) {
            warn!("Connection released after pool shutdown, closing it");
            self.discard(conn, "pool closed");
            return;
        }
        self.idle.lock().push(conn);
        self.publish();
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            live: self.live.load(Ordering::SeqCst),
            idle: self.idle.lock().len(),
            max_connections: self.config.max_connections,
        }
    }

    fn publish(&self) {
        let status = self.status();
        filler_metrics::gauges::set_pool_connections(status.live, status.idle);
    }
}

/// Bounded pool of validated connections.
///
/// At most `max_connections` connections exist at any time. Every checkout
/// checks the connection first; dead ones are dropped and replaced.
pub struct ConnectionPool<M: ManageConnection> {
    shared: Arc<SharedPool<M>>,
}

impl<M: ManageConnection> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M: ManageConnection> ConnectionPool<M> {
    /// Create a pool that opens connections on demand
    pub fn new(manager: M, mut config: PoolConfig) -> Self {
        config.max_connections = config.max_connections.max(1);
        config.min_connections = config.min_connections.min(config.max_connections);
        config.acquire_attempts = config.acquire_attempts.max(1);

        Self {
            shared: Arc::new(SharedPool {
                slots: Arc::new(Semaphore::new(config.max_connections as usize)),
                manager,
                config,
                idle: Mutex::new(Vec::new()),
                live: AtomicU32::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a pool and open `min_connections` up front
    pub async fn connect(manager: M, config: PoolConfig) -> Result<Self> {
        let pool = Self::new(manager, config);
        let shared = &pool.shared;

        info!(
            min_connections = shared.config.min_connections,
            max_connections = shared.config.max_connections,
            "Opening connection pool"
        );

        for _ in 0..shared.config.min_connections {
            let conn = shared.manager.connect().await?;
            shared.live.fetch_add(1, Ordering::SeqCst);
            shared.idle.lock().push(conn);
        }
        shared.publish();

        info!("Connection pool established");
        Ok(pool)
    }

    /// Check out a healthy connection.
    ///
    /// Waiting longer than `acquire_timeout` for a free slot yields
    /// [`DatabaseError::PoolTimedOut`]. Each failed attempt (connect error,
    /// closed handle, failed liveness check) backs off
    /// `acquire_backoff_base * 2^attempt` before the next one. Running out of
    /// attempts yields [`DatabaseError::PoolUnavailable`].
    pub async fn acquire(&self) -> Result<PooledConnection<M>> {
        let started = Instant::now();
        let attempts = self.shared.config.acquire_attempts;

        for attempt in 0..attempts {
            if self.is_closed() {
                return Err(DatabaseError::PoolClosed);
            }

            match self.checkout().await {
                Ok(conn) => {
                    filler_metrics::histograms::pool_acquire_duration(started.elapsed());
                    return Ok(conn);
                }
                Err(DatabaseError::PoolClosed) => return Err(DatabaseError::PoolClosed),
                Err(DatabaseError::PoolTimedOut) => {
                    error!(
                        timeout_secs = self.shared.config.acquire_timeout.as_secs(),
                        "Timed out waiting for a free connection slot"
                    );
                    return Err(DatabaseError::PoolTimedOut);
                }
                Err(e) => {
                    let wait = self.shared.config.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Connection checkout failed"
                    );
                    if attempt + 1 < attempts {
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        error!(attempts, "No working database connection after retries");
        Err(DatabaseError::PoolUnavailable { attempts })
    }

    async fn checkout(&self) -> Result<PooledConnection<M>> {
        let shared = &self.shared;

        let permit = match tokio::time::timeout(
            shared.config.acquire_timeout,
            shared.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DatabaseError::PoolClosed),
            Err(_) => return Err(DatabaseError::PoolTimedOut),
        };

        let idle = shared.idle.lock().pop();
        let mut conn = match idle {
            Some(conn) => conn,
            None => {
                let conn = shared.manager.connect().await?;
                shared.live.fetch_add(1, Ordering::SeqCst);
                conn
            }
        };

        if shared.manager.has_broken(&conn) {
            shared.discard(conn, "closed");
            return Err(DatabaseError::Connection(
                "connection is already closed".to_string(),
            ));
        }

        if let Err(e) = shared.manager.is_valid(&mut conn).await {
            shared.discard(conn, "liveness check failed");
            return Err(e);
        }

        Ok(PooledConnection {
            conn: Some(conn),
            shared: shared.clone(),
            _permit: permit,
            broken: false,
        })
    }

    /// Close every idle connection and refuse further checkouts.
    ///
    /// Connections still checked out are closed when they are released.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!("Connection pool already shut down");
            return;
        }

        self.shared.slots.close();
        let idle = std::mem::take(&mut *self.shared.idle.lock());
        let count = idle.len();
        for conn in idle {
            self.shared.manager.close(conn).await;
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
        }
        self.shared.publish();

        info!(closed = count, "Connection pool shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PoolStatus {
        self.shared.status()
    }

    pub fn manager(&self) -> &M {
        &self.shared.manager
    }
}

/// A checked-out connection, returned to its pool when dropped
pub struct PooledConnection<M: ManageConnection> {
    conn: Option<M::Connection>,
    shared: Arc<SharedPool<M>>,
    // Freed after Drop::drop has put the connection back
    _permit: OwnedSemaphorePermit,
    broken: bool,
}

impl<M: ManageConnection> PooledConnection<M> {
    /// Discard instead of recycling on release
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Return the connection to the pool now
    pub fn release(self) {
        drop(self);
    }
}

impl<M: ManageConnection> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until release")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until release")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.put_back(conn, self.broken);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockConn {
        id: u32,
        closed: bool,
        open: Arc<AtomicU32>,
    }

    impl Drop for MockConn {
        fn drop(&mut self) {
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockManager {
        connects: AtomicU32,
        failing_checks: AtomicU32,
        open: Arc<AtomicU32>,
        max_open: AtomicU32,
    }

    #[async_trait]
    impl ManageConnection for MockManager {
        type Connection = MockConn;

        async fn connect(&self) -> Result<MockConn> {
            let id = self.connects.fetch_add(1, Ordering::SeqCst);
            let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_open.fetch_max(open, Ordering::SeqCst);
            Ok(MockConn {
                id,
                closed: false,
                open: self.open.clone(),
            })
        }

        async fn is_valid(&self, _conn: &mut MockConn) -> Result<()> {
            let remaining = self.failing_checks.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_checks.store(remaining - 1, Ordering::SeqCst);
                return Err(DatabaseError::Connection("SELECT 1 failed".to_string()));
            }
            Ok(())
        }

        fn has_broken(&self, conn: &MockConn) -> bool {
            conn.closed
        }
    }

    fn config(min: u32, max: u32) -> PoolConfig {
        PoolConfig {
            min_connections: min,
            max_connections: max,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connect_opens_min_connections() {
        let pool = ConnectionPool::connect(MockManager::default(), config(2, 4))
            .await
            .unwrap();
        let status = pool.status();
        assert_eq!(status.live, 2);
        assert_eq!(status.idle, 2);
        assert_eq!(status.max_connections, 4);
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let pool = ConnectionPool::connect(MockManager::default(), config(1, 2))
            .await
            .unwrap();

        let conn = pool.acquire().await.unwrap();
        let first_id = conn.id;
        conn.release();

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, first_id);
        assert_eq!(pool.manager().connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_connection_is_replaced_on_release() {
        let pool = ConnectionPool::connect(MockManager::default(), config(1, 2))
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        conn.closed = true;
        drop(conn);
        assert_eq!(pool.status().live, 0);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, 1);
        assert_eq!(pool.status().live, 1);
    }

    #[tokio::test]
    async fn test_marked_broken_connection_is_discarded() {
        let pool = ConnectionPool::connect(MockManager::default(), config(1, 2))
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        drop(conn);

        assert_eq!(pool.status().live, 0);
        assert_eq!(pool.manager().open.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_liveness_check_discards_and_retries() {
        let pool = ConnectionPool::connect(MockManager::default(), config(1, 2))
            .await
            .unwrap();
        pool.manager().failing_checks.store(1, Ordering::SeqCst);

        let start = tokio::time::Instant::now();
        let conn = pool.acquire().await.unwrap();

        // idle connection 0 failed its liveness check; connection 1 replaced it
        assert_eq!(conn.id, 1);
        assert_eq!(pool.status().live, 1);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_failures_exhaust_attempts() {
        let pool = ConnectionPool::new(MockManager::default(), config(0, 2));
        pool.manager().failing_checks.store(u32::MAX, Ordering::SeqCst);

        let start = tokio::time::Instant::now();
        let err = pool.acquire().await.unwrap_err();

        assert!(matches!(err, DatabaseError::PoolUnavailable { attempts: 5 }));
        assert!(!err.is_retryable());
        assert_eq!(pool.manager().connects.load(Ordering::SeqCst), 5);
        assert_eq!(pool.status().live, 0);
        // backoff between attempts: 100 + 200 + 400 + 800 ms
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_wait_times_out_once() {
        let pool = ConnectionPool::connect(
            MockManager::default(),
            PoolConfig {
                acquire_timeout: Duration::from_secs(1),
                ..config(1, 1)
            },
        )
        .await
        .unwrap();
        let _held = pool.acquire().await.unwrap();

        let start = tokio::time::Instant::now();
        let err = pool.acquire().await.unwrap_err();

        assert!(matches!(err, DatabaseError::PoolTimedOut));
        assert!(!err.is_retryable());
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(pool.manager().connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_blocks_at_capacity_until_release() {
        let pool = ConnectionPool::connect(MockManager::default(), config(2, 4))
            .await
            .unwrap();

        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(pool.acquire().await.unwrap());
        }
        assert_eq!(pool.status().live, 4);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|conn| conn.id) })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!waiter.is_finished());
        assert_eq!(pool.status().live, 4);

        let released_id = held.pop().unwrap().id;
        let got = waiter.await.unwrap().unwrap();

        assert_eq!(got, released_id);
        assert_eq!(pool.manager().max_open.load(Ordering::SeqCst), 4);
        assert_eq!(pool.status().live, 4);
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_never_exceed_max() {
        let pool = ConnectionPool::connect(MockManager::default(), config(2, 4))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let conn = pool.acquire().await.unwrap();
                tokio::task::yield_now().await;
                drop(conn);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(pool.manager().max_open.load(Ordering::SeqCst) <= 4);
        assert!(pool.status().live <= 4);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let pool = ConnectionPool::connect(MockManager::default(), config(2, 4))
            .await
            .unwrap();
        let outstanding = pool.acquire().await.unwrap();

        pool.shutdown().await;
        pool.shutdown().await;

        assert!(pool.is_closed());
        assert_eq!(pool.status().idle, 0);
        assert!(matches!(pool.acquire().await, Err(DatabaseError::PoolClosed)));

        // released after shutdown: closed instead of pooled
        drop(outstanding);
        assert_eq!(pool.status().live, 0);
        assert_eq!(pool.manager().open.load(Ordering::SeqCst), 0);
    }
}
