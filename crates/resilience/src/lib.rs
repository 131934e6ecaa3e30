//! Generic resilience primitives wrapping every downstream call: a tri-state
//! circuit breaker, a TTL/LRU cache, a bounded connection pool, an
//! exponential-backoff retry policy, and a coalescing batch queue.
//!
//! All time handling goes through `tokio::time` so tests can pause and
//! advance the clock.

pub mod batch;
pub mod breaker;
pub mod cache;
pub mod pool;
pub mod retry;

// Re-export public types
pub use batch::BatchQueue;
pub use breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
pub use cache::Cache;
pub use pool::{ConnectionPool, Connector, PoolConfig, PoolError, PooledConnection};
pub use retry::RetryPolicy;
