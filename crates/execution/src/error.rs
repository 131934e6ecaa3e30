use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The order-submission breaker is open; nothing was attempted and the
    /// caller may re-queue the order later.
    #[error("circuit '{operation}' is open")]
    CircuitOpen { operation: String },

    #[error("exchange client error: {0}")]
    Exchange(#[from] exchange_client::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] resilience::PoolError),
}

pub type Result<T> = std::result::Result<T, Error>;
