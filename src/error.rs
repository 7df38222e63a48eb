//! Error types for branchwatch

use thiserror::Error;

/// Main error type for monitoring engine operations
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::database::DatabaseError),

    #[error("Probe error: {0}")]
    Probe(#[from] crate::probe::ProbeError),

    #[error("Time-series error: {0}")]
    Timeseries(#[from] crate::timeseries::TimeseriesError),

    #[error("Credential error: {0}")]
    Credential(#[from] crate::crypto::CryptoError),

    #[error("Evaluator error: {0}")]
    Evaluator(#[from] crate::alerts::EvaluatorError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::dispatcher::DispatchError),

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Crate-wide result alias
pub type MonitorResult<T> = Result<T, MonitorError>;
