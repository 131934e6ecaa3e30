use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(#[from] serde_json::Error),
    #[error("API error: code {code}, msg: {msg}")]
    ApiError { code: i64, msg: String },
    #[error("circuit '{0}' is open")]
    CircuitOpen(String),
    #[error("not enough history to estimate volatility for {0}")]
    InsufficientHistory(String),
}

pub type Result<T> = std::result::Result<T, Error>;
