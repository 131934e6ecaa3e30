use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("confidence must be within [0, 1], got {0}")]
    ConfidenceOutOfRange(f64),

    #[error("requested notional must be positive, got {0}")]
    NonPositiveNotional(rust_decimal::Decimal),
}

pub type Result<T> = std::result::Result<T, Error>;
