use std::time::Duration;

use thiserror::Error;

use crate::serial::{DeserializeError, SerializeError};
use crate::types::{CompileError, RuleId};

/// Unified error type for compiling rules and talking to a rule store.
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("compile: {0}")]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error("decoding compiled rule '{rule_id}': {source}")]
    Deserialize {
        rule_id: RuleId,
        source: DeserializeError,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

pub type Result<T, E = RulesError> = std::result::Result<T, E>;

impl RulesError {
    /// Stable, machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Compile(_) => "COMPILE_FAILED",
            Self::Serialize(_) => "SERIALIZE_FAILED",
            Self::Deserialize { .. } => "CORRUPT_RULE",
            Self::Persistence(PersistenceError::Timeout { .. }) => "STORE_TIMEOUT",
            Self::Persistence(_) => "STORE_ERROR",
        }
    }
}

/// Failures of the backing storage engine.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[cfg(feature = "postgres")]
    #[error("postgres {operation}: {source}")]
    Postgres {
        operation: &'static str,
        source: sqlx::Error,
    },

    #[cfg(feature = "postgres")]
    #[error("postgres {operation}: {source}")]
    Migrate {
        operation: &'static str,
        source: sqlx::migrate::MigrateError,
    },

    #[cfg(feature = "mongo")]
    #[error("mongodb {operation}: {source}")]
    Mongo {
        operation: &'static str,
        source: mongodb::error::Error,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("{operation}: malformed stored rule: {message}")]
    Malformed {
        operation: &'static str,
        message: String,
    },
}
