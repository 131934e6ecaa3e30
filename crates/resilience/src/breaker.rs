use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use events::{BreakerTransition, GateEvent};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Configuration for one breaker instance.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker open.
    pub threshold: u32,
    /// Cooldown before a single trial call is allowed through.
    pub timeout: Duration,
}

/// The externally observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The breaker is open; the wrapped operation was never invoked.
    #[error("circuit '{operation}' is open")]
    Open { operation: String },
    /// The wrapped operation ran and failed.
    #[error("{0}")]
    Inner(E),
}

enum Inner {
    Closed { failure_count: u32 },
    Open { since: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// A tri-state circuit breaker isolating one failing downstream operation
/// class.
///
/// Each operation class (order submission, market data, persistence) owns an
/// independent instance so one failing dependency does not block unrelated
/// traffic. Only the call that owns the in-flight operation transitions the
/// breaker.
pub struct CircuitBreaker {
    operation: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    events: Option<broadcast::Sender<GateEvent>>,
}

impl CircuitBreaker {
    pub fn new(operation: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            operation: operation.into(),
            config,
            inner: Mutex::new(Inner::Closed { failure_count: 0 }),
            events: None,
        }
    }

    /// Publishes `BreakerOpened` / `BreakerClosed` transitions on the given bus.
    pub fn with_events(mut self, events: broadcast::Sender<GateEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn state(&self) -> BreakerState {
        match &*self.inner.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Runs `op` through the breaker.
    ///
    /// Open state fails fast with [`BreakerError::Open`] until the cooldown
    /// elapses, after which exactly one trial call is admitted; its outcome
    /// decides between closing again and re-opening with a fresh cooldown.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let trial = {
            let mut inner = self.inner.lock();
            match &mut *inner {
                Inner::Closed { .. } => false,
                Inner::Open { since } => {
                    if since.elapsed() >= self.config.timeout {
                        *inner = Inner::HalfOpen {
                            trial_in_flight: true,
                        };
                        true
                    } else {
                        return Err(self.open_error());
                    }
                }
                Inner::HalfOpen { trial_in_flight } => {
                    if *trial_in_flight {
                        return Err(self.open_error());
                    }
                    *trial_in_flight = true;
                    true
                }
            }
        };

        // If the caller cancels a trial mid-flight the half-open slot must not
        // stay occupied forever; the guard re-opens the breaker on drop.
        let mut guard = TrialGuard {
            breaker: self,
            armed: trial,
        };
        let result = op().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.on_success(trial);
                Ok(value)
            }
            Err(err) => {
                self.on_failure();
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn open_error<E>(&self) -> BreakerError<E> {
        BreakerError::Open {
            operation: self.operation.clone(),
        }
    }

    fn on_success(&self, was_trial: bool) {
        let mut inner = self.inner.lock();
        let mut closed_after_trial = false;
        match &mut *inner {
            Inner::Closed { failure_count } => *failure_count = 0,
            Inner::HalfOpen { .. } if was_trial => closed_after_trial = true,
            // A stale success from a call that started before the breaker
            // tripped never closes it.
            _ => {}
        }
        if closed_after_trial {
            *inner = Inner::Closed { failure_count: 0 };
        }
        drop(inner);
        if closed_after_trial {
            tracing::info!(operation = %self.operation, "circuit closed after successful trial");
            self.publish(false, 0);
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        let tripped = match &mut *inner {
            Inner::Closed { failure_count } => {
                *failure_count += 1;
                (*failure_count >= self.config.threshold).then_some(*failure_count)
            }
            Inner::HalfOpen { .. } => Some(self.config.threshold),
            // Another in-flight call already tripped the breaker; its cooldown
            // stands.
            Inner::Open { .. } => None,
        };
        if let Some(failure_count) = tripped {
            *inner = Inner::Open {
                since: Instant::now(),
            };
            drop(inner);
            tracing::warn!(
                operation = %self.operation,
                failure_count,
                "circuit opened"
            );
            self.publish(true, failure_count);
        }
    }

    fn reopen(&self) {
        *self.inner.lock() = Inner::Open {
            since: Instant::now(),
        };
        tracing::warn!(operation = %self.operation, "trial call cancelled, circuit re-opened");
        self.publish(true, self.config.threshold);
    }

    fn publish(&self, opened: bool, failure_count: u32) {
        if let Some(events) = &self.events {
            let transition = BreakerTransition {
                operation: self.operation.clone(),
                failure_count,
                at: Utc::now(),
            };
            let event = if opened {
                GateEvent::BreakerOpened(transition)
            } else {
                GateEvent::BreakerClosed(transition)
            };
            let _ = events.send(event);
        }
    }
}

struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.reopen();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new("test-op", BreakerConfig { threshold, timeout })
    }

    async fn fail(breaker: &CircuitBreaker) {
        let result: Result<(), BreakerError<&str>> = breaker.call(|| async { Err("boom") }).await;
        assert!(matches!(result, Err(BreakerError::Inner(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_breaker_passes_calls_through() {
        let cb = breaker(3, Duration::from_secs(60));
        let result: Result<u32, BreakerError<&str>> = cb.call(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_failure_count() {
        let cb = breaker(3, Duration::from_secs(60));
        fail(&cb).await;
        fail(&cb).await;
        let _: Result<(), BreakerError<&str>> = cb.call(|| async { Ok(()) }).await;
        // Two more failures must not trip a threshold of three.
        fail(&cb).await;
        fail(&cb).await;
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_exactly_threshold_failures_and_fails_fast() {
        let cb = breaker(5, Duration::from_secs(60));
        for _ in 0..4 {
            fail(&cb).await;
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        fail(&cb).await;
        assert_eq!(cb.state(), BreakerState::Open);

        // The wrapped operation must not be invoked while open.
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let result: Result<(), BreakerError<&str>> = cb
            .call(|| async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_success_closes_after_timeout() {
        // Scenario: threshold 5, timeout 60s; open, rejected at t+10s, healed at t+61s.
        let cb = breaker(5, Duration::from_secs(60));
        for _ in 0..5 {
            fail(&cb).await;
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        let result: Result<(), BreakerError<&str>> = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));

        tokio::time::advance(Duration::from_secs(51)).await;
        let result: Result<u32, BreakerError<&str>> = cb.call(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_failure_reopens_with_fresh_cooldown() {
        let cb = breaker(2, Duration::from_secs(30));
        fail(&cb).await;
        fail(&cb).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        fail(&cb).await; // the trial
        assert_eq!(cb.state(), BreakerState::Open);

        // The cooldown restarted at the trial failure.
        tokio::time::advance(Duration::from_secs(15)).await;
        let result: Result<(), BreakerError<&str>> = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_exactly_one_trial() {
        let cb = Arc::new(breaker(1, Duration::from_secs(10)));
        fail(&cb).await;
        tokio::time::advance(Duration::from_secs(10)).await;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let trial_cb = cb.clone();
        let trial = tokio::spawn(async move {
            trial_cb
                .call(|| async move {
                    rx.await.ok();
                    Ok::<_, &str>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        // A second caller is rejected while the trial is in flight.
        let result: Result<(), BreakerError<&str>> = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));

        tx.send(()).ok();
        trial.await.unwrap().unwrap();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_transitions_on_the_event_bus() {
        let (tx, mut rx) = tokio::sync::broadcast::channel(16);
        let cb = CircuitBreaker::new(
            "order-submission",
            BreakerConfig {
                threshold: 1,
                timeout: Duration::from_secs(5),
            },
        )
        .with_events(tx);

        fail(&cb).await;
        match rx.try_recv().unwrap() {
            GateEvent::BreakerOpened(t) => {
                assert_eq!(t.operation, "order-submission");
                assert_eq!(t.failure_count, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        let _: Result<(), BreakerError<&str>> = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(rx.try_recv(), Ok(GateEvent::BreakerClosed(_))));
    }
}
