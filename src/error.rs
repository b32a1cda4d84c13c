use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatcherError {
    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("Missing baseline: {0}")]
    MissingBaseline(String),

    #[error("Delivery failure: {0}")]
    DeliveryFailure(String),

    #[error("Price out of range: {0}")]
    PriceOutOfRange(String),

    #[error("Reconciliation failure: {0}")]
    ReconciliationFailure(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Incorrect threshold {0} (can be 5, 8 or 10)")]
    InvalidThreshold(i64),

    #[error("Incorrect address: {0}")]
    InvalidAddress(String),

    #[error("Invalid push token")]
    InvalidPushToken,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, WatcherError>;
