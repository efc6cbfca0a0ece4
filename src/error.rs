//! Crate-wide error taxonomy.
//!
//! Each owning component gets its own `thiserror` enum; [`TradingError`]
//! aggregates them at boundaries (executor, reconciler, validator) that need
//! to return a single type. Unique-constraint violations on idempotent keys
//! are not represented as errors here — callers treat them as success and
//! read back the existing row (see [`PersistenceError::is_duplicate`]).

use thiserror::Error;

/// Raised by [`crate::startup_gate`]; always fatal, the process exits.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error("invalid config value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("startup gate failed: {0}")]
    GateFailed(String),
}

/// Failures talking to a broker (data or execution side).
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("transient broker error: {0}")]
    Transient(String),

    #[error("permanent broker rejection: {0}")]
    Permanent(String),

    #[error("broker call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Transient(_) | BrokerError::Timeout(_))
    }
}

/// Postgres-backed persistence failures.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("state machine violation: cannot go {from} -> {to} for trade {trade_id}")]
    StateMachineViolation {
        trade_id: uuid::Uuid,
        from: String,
        to: String,
    },
}

impl PersistenceError {
    /// Postgres unique_violation is SQLSTATE 23505.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            PersistenceError::Database(sqlx::Error::Database(db))
                if db.code().as_deref() == Some("23505")
        )
    }
}

/// Why the sizer or validator could not produce an approved quantity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataUnavailableError {
    #[error("required market data unavailable: {0}")]
    MissingInput(String),
}

/// Aggregate error returned by components that call across several
/// subsystems (executor, reconciler, fan-out).
#[derive(Debug, Error)]
pub enum TradingError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    DataUnavailable(#[from] DataUnavailableError),
}
