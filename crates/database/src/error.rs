use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to connect to the database: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Database write failed: {0}")]
    OperationFailed(sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
