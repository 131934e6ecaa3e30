use std::ops::{Deref, DerefMut};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("timed out after {waited_ms}ms waiting for a connection")]
    AcquireTimeout { waited_ms: u64 },

    #[error("failed to open a new connection: {0}")]
    Connect(String),

    #[error("pool is shut down")]
    Closed,
}

/// Opens new connections on demand for a [`ConnectionPool`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, PoolError>;
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard ceiling on simultaneously held connections.
    pub max: usize,
    /// How long a waiter queues before receiving a timeout error.
    pub acquire_timeout: Duration,
}

/// Bounds concurrent use of a scarce downstream resource (a DB handle, an
/// exchange session).
///
/// `acquire` hands out an idle connection when one exists, opens a new one
/// while the total stays under `max`, and otherwise queues the caller FIFO.
/// Dropping the returned guard releases the connection and wakes the
/// longest-waiting queued request. A timed-out waiter is cancelled without
/// affecting other waiters.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    config: PoolConfig,
    permits: Semaphore,
    idle: Mutex<Vec<C::Connection>>,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        let permits = Semaphore::new(config.max.max(1));
        Self {
            connector,
            config,
            permits,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub async fn acquire(&self) -> Result<PooledConnection<'_, C>, PoolError> {
        // Holding a permit is what guarantees active <= max; the tokio
        // semaphore queues waiters fairly, so release order is FIFO.
        let permit = tokio::time::timeout(self.config.acquire_timeout, self.permits.acquire())
            .await
            .map_err(|_| PoolError::AcquireTimeout {
                waited_ms: self.config.acquire_timeout.as_millis() as u64,
            })?
            .map_err(|_| PoolError::Closed)?;

        let conn = match self.idle.lock().pop() {
            Some(conn) => conn,
            None => self.connector.connect().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
            _permit: permit,
        })
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

/// RAII guard over a pooled connection; returns it to the idle set on drop.
pub struct PooledConnection<'a, C: Connector> {
    conn: Option<C::Connection>,
    pool: &'a ConnectionPool<C>,
    _permit: SemaphorePermit<'a>,
}

impl<C: Connector> Deref for PooledConnection<'_, C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl<C: Connector> DerefMut for PooledConnection<'_, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl<C: Connector> Drop for PooledConnection<'_, C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.idle.lock().push(conn);
        }
        // The permit drops after this body, waking the next queued waiter
        // only once the connection is back in the idle set.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestConnector {
        opened: Arc<AtomicUsize>,
    }

    struct TestConn(#[allow(dead_code)] usize);

    #[async_trait]
    impl Connector for TestConnector {
        type Connection = TestConn;

        async fn connect(&self) -> Result<TestConn, PoolError> {
            Ok(TestConn(self.opened.fetch_add(1, Ordering::SeqCst)))
        }
    }

    fn pool(max: usize, acquire_timeout: Duration) -> (ConnectionPool<TestConnector>, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let connector = TestConnector {
            opened: opened.clone(),
        };
        (
            ConnectionPool::new(
                connector,
                PoolConfig {
                    max,
                    acquire_timeout,
                },
            ),
            opened,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_released_connections() {
        let (pool, opened) = pool(2, Duration::from_secs(1));
        {
            let _conn = pool.acquire().await.unwrap();
        }
        let _conn = pool.acquire().await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_times_out_instead_of_hanging() {
        let (pool, _) = pool(1, Duration::from_millis(500));
        let held = pool.acquire().await.unwrap();

        let result = pool.acquire().await;
        assert!(matches!(
            result,
            Err(PoolError::AcquireTimeout { waited_ms: 500 })
        ));
        drop(held);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_holders_never_exceed_max() {
        let (pool, _) = pool(3, Duration::from_secs(10));
        let pool = Arc::new(pool);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _conn = pool.acquire().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn release_serves_a_queued_waiter() {
        let (pool, opened) = pool(1, Duration::from_secs(5));
        let pool = Arc::new(pool);

        let held = pool.acquire().await.unwrap();
        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move {
            let _conn = waiter_pool.acquire().await.unwrap();
        });
        tokio::task::yield_now().await;

        drop(held);
        waiter.await.unwrap();
        // The waiter reused the released connection instead of opening one.
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
    }
}
