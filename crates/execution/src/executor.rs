use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use core_types::{
    Fill, Order, OrderRecord, OrderStatus, OrderType, RejectReason, SizedOrder, Symbol,
};
use events::GateEvent;
use exchange_client::{ExchangeApi, OrderOutcome, PlaceOrderRequest};
use parking_lot::Mutex;
use resilience::{
    BatchQueue, BreakerError, CircuitBreaker, ConnectionPool, Connector, PoolConfig, PoolError,
    RetryPolicy,
};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::positions::PositionBook;

/// Opens logical exchange sessions for the connection pool, bounding how many
/// order submissions are in flight at once.
pub struct ExchangeConnector<A: ExchangeApi> {
    api: Arc<A>,
}

pub struct ExchangeSession<A: ExchangeApi> {
    api: Arc<A>,
}

impl<A: ExchangeApi> ExchangeSession<A> {
    pub async fn place_order(
        &self,
        request: &PlaceOrderRequest,
    ) -> exchange_client::Result<exchange_client::PlaceOrderResponse> {
        self.api.place_order(request).await
    }
}

#[async_trait]
impl<A: ExchangeApi> Connector for ExchangeConnector<A> {
    type Connection = ExchangeSession<A>;

    async fn connect(&self) -> std::result::Result<Self::Connection, PoolError> {
        Ok(ExchangeSession {
            api: self.api.clone(),
        })
    }
}

struct OrderEntry {
    order: Order,
    inserted_at: Instant,
}

/// The outcome of a submission: the owning order, plus the fill when the
/// exchange executed it.
#[derive(Debug, Clone)]
pub struct Submission {
    pub order: Order,
    pub fill: Option<Fill>,
}

/// Submits accepted orders to the exchange and owns their lifecycle.
///
/// Submissions go through `CircuitBreaker("order-submission")` wrapping the
/// retry loop, so the breaker is consulted once per logical call and one
/// exhausted retry budget counts as one breaker failure. The idempotency
/// table guarantees at most one exchange call per key within the retention
/// window.
pub struct OrderExecutor<A: ExchangeApi> {
    orders: Mutex<HashMap<String, OrderEntry>>,
    positions: Mutex<PositionBook>,
    next_id: AtomicU64,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    sessions: ConnectionPool<ExchangeConnector<A>>,
    persistence: BatchQueue<OrderRecord>,
    events: broadcast::Sender<GateEvent>,
    retention: Duration,
}

impl<A: ExchangeApi> OrderExecutor<A> {
    pub fn new(
        api: Arc<A>,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
        pool_config: PoolConfig,
        persistence: BatchQueue<OrderRecord>,
        events: broadcast::Sender<GateEvent>,
        retention: Duration,
    ) -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
            positions: Mutex::new(PositionBook::new()),
            next_id: AtomicU64::new(0),
            breaker,
            retry,
            sessions: ConnectionPool::new(ExchangeConnector { api }, pool_config),
            persistence,
            events,
            retention,
        }
    }

    /// Submits one sized order.
    ///
    /// A key already present in the idempotency table returns the existing
    /// order without touching the exchange. `Err` is reserved for the open
    /// breaker; a downstream failure after retries leaves the order
    /// `Rejected` with a `DownstreamFailure` reason and is returned as a
    /// normal submission.
    pub async fn submit(&self, sized: SizedOrder) -> Result<Submission> {
        self.prune_expired();

        if let Some(existing) = self.lookup(&sized.idempotency_key) {
            tracing::debug!(
                key = %sized.idempotency_key,
                order_id = existing.id,
                "duplicate submission, returning existing order"
            );
            return Ok(Submission {
                order: existing,
                fill: None,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut order = Order::pending(id, &sized, Utc::now());
        self.store(order.clone());

        let request = PlaceOrderRequest {
            symbol: sized.symbol.clone(),
            side: sized.side,
            order_type: OrderType::Market,
            quote_qty: sized.sized_notional,
            client_order_id: sized.idempotency_key.clone(),
        };

        tracing::info!(
            order_id = id,
            symbol = %sized.symbol,
            notional = %sized.sized_notional,
            "submitting order"
        );

        let result = self
            .breaker
            .call(|| {
                self.retry.run(|| async {
                    let session = self.sessions.acquire().await?;
                    let response = session.place_order(&request).await?;
                    Ok::<_, Error>(response)
                })
            })
            .await;

        match result {
            Ok(response) => match response.outcome {
                OrderOutcome::Filled { execution_price } => {
                    let qty = if execution_price > Decimal::ZERO {
                        sized.sized_notional / execution_price
                    } else {
                        Decimal::ZERO
                    };
                    let realized_pnl = self.positions.lock().apply_fill(
                        &order.symbol,
                        order.side,
                        qty,
                        execution_price,
                    );
                    order.status = OrderStatus::Filled {
                        exchange_order_id: response.order_id,
                        qty,
                        execution_price,
                    };
                    self.finish(&mut order, GateEvent::OrderFilled(order.clone()));
                    let fill = Fill {
                        symbol: order.symbol.clone(),
                        side: order.side,
                        qty,
                        price: execution_price,
                        notional: sized.sized_notional,
                        realized_pnl,
                    };
                    Ok(Submission {
                        order,
                        fill: Some(fill),
                    })
                }
                OrderOutcome::Rejected { reason } => {
                    tracing::warn!(order_id = id, %reason, "exchange rejected order");
                    order.status = OrderStatus::Rejected {
                        reason: RejectReason::Exchange(reason),
                    };
                    self.finish(&mut order, GateEvent::OrderRejected(order.clone()));
                    Ok(Submission { order, fill: None })
                }
            },
            Err(BreakerError::Open { operation }) => {
                // Nothing was attempted; forget the pending entry so a
                // re-queued submission with the same key can retry.
                self.remove(&sized.idempotency_key);
                Err(Error::CircuitOpen { operation })
            }
            Err(BreakerError::Inner(err)) => {
                tracing::error!(order_id = id, error = %err, "retries exhausted, rejecting order");
                order.status = OrderStatus::Rejected {
                    reason: RejectReason::DownstreamFailure(err.to_string()),
                };
                self.finish(&mut order, GateEvent::OrderRejected(order.clone()));
                Ok(Submission { order, fill: None })
            }
        }
    }

    /// The order currently held for an idempotency key, if any.
    pub fn order_for_key(&self, key: &str) -> Option<Order> {
        self.lookup(key)
    }

    pub fn net_position(&self, symbol: &Symbol) -> Decimal {
        self.positions.lock().net_qty(symbol)
    }

    pub fn breaker_state(&self) -> resilience::BreakerState {
        self.breaker.state()
    }

    fn finish(&self, order: &mut Order, event: GateEvent) {
        order.updated_at = Utc::now();
        self.store(order.clone());
        self.persistence.add(OrderRecord::from(&*order));
        let _ = self.events.send(event);
    }

    fn lookup(&self, key: &str) -> Option<Order> {
        self.orders.lock().get(key).map(|entry| entry.order.clone())
    }

    fn store(&self, order: Order) {
        self.orders.lock().insert(
            order.idempotency_key.clone(),
            OrderEntry {
                order,
                inserted_at: Instant::now(),
            },
        );
    }

    fn remove(&self, key: &str) {
        self.orders.lock().remove(key);
    }

    /// Drops terminal orders that have aged out of the retention window so
    /// the idempotency table stays bounded.
    fn prune_expired(&self) {
        let retention = self.retention;
        self.orders.lock().retain(|_, entry| {
            !entry.order.is_terminal() || entry.inserted_at.elapsed() < retention
        });
    }
}
