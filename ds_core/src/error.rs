/// Core error type for the scheduler.
///
/// These variants are a taxonomy of *outcomes*, not of exception types: no
/// component boundary in this crate lets a panic or an opaque exception
/// escape. Every fallible operation converts its failure into one of these
/// before returning.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad cron expression, malformed envelope, missing/invalid field. Never
    /// retried automatically by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Store connect timeout, broker produce failure, coordination-service
    /// disconnect. Logged at warn, retried at the next tick or period.
    #[error("transient error: {0}")]
    Transient(String),

    /// Session expired while this process held the leader lease.
    #[error("lost leadership: {0}")]
    LostLeadership(String),

    /// A `JOB_RESULT` envelope arrived for an execution id the store does
    /// not recognize.
    #[error("orphan result: {0}")]
    Orphan(String),

    /// No live executor is available, or every live executor is at capacity.
    #[error("saturation: {0}")]
    Saturation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("coordination service error: {0}")]
    Coordination(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
