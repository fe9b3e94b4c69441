//! Error types for the mapper.
//!
//! Three failure classes are surfaced to callers:
//! - `Mapping`: entity shape problems (missing `id`, unmatched column, bad coercion).
//!   Raised before anything reaches the driver whenever possible.
//! - `Execution`: driver failures, always carrying the driver's error as source.
//! - `Transaction`: a rollback that failed after another error. The state of the
//!   underlying transaction is unknown; callers should escalate, not retry.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error reported by a database driver implementation.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct DriverError {
    message: String,
    /// e.g., "42P01" for undefined table
    sql_state: Option<String>,
    #[source]
    source: Option<BoxError>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sql_state: None,
            source: None,
        }
    }

    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sql_state(&self) -> Option<&str> {
        self.sql_state.as_deref()
    }
}

/// Convert sqlx errors, keeping the SQLSTATE code when the server sent one.
impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            let mut driver_err = DriverError::new(db_err.message().to_string());
            driver_err.sql_state = db_err.code().map(|c| c.into_owned());
            return driver_err.with_source(err);
        }

        match err {
            sqlx::Error::Configuration(msg) => {
                DriverError::new(format!("Invalid connection configuration: {}", msg))
            }
            sqlx::Error::Io(io_err) => {
                DriverError::new(format!("I/O error: {}", io_err)).with_source(io_err)
            }
            sqlx::Error::Tls(tls_err) => DriverError::new(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => DriverError::new(format!("Protocol error: {}", msg)),
            sqlx::Error::PoolClosed => DriverError::new("Connection pool is closed"),
            sqlx::Error::ColumnDecode { index, source } => {
                DriverError::new(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DriverError::new(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DriverError::new(format!("Driver error: {}", err)),
            sqlx::Error::WorkerCrashed => DriverError::new("Database worker crashed"),
            other => DriverError::new(other.to_string()).with_source(other),
        }
    }
}

/// A raw value could not be converted into a field's declared type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot convert {found} into {expected}")]
pub struct CoercionError {
    pub expected: &'static str,
    pub found: String,
}

impl CoercionError {
    pub fn new(expected: &'static str, found: impl Into<String>) -> Self {
        Self {
            expected,
            found: found.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Mapping error: {message} (entity: {entity})")]
    Mapping {
        message: String,
        entity: String,
        #[source]
        source: Option<CoercionError>,
    },

    #[error("Execution error during {operation}: {source}")]
    Execution {
        operation: String,
        #[source]
        source: DriverError,
    },

    #[error("Transaction error: rollback failed ({rollback}) after: {original}")]
    Transaction {
        #[source]
        original: Box<DbError>,
        rollback: DriverError,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    /// Create a mapping error for an entity type or table.
    pub fn mapping(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
            entity: entity.into(),
            source: None,
        }
    }

    /// Create a mapping error caused by a failed value conversion on `field`.
    pub fn coercion(entity: impl Into<String>, field: &str, source: CoercionError) -> Self {
        Self::Mapping {
            message: format!("field '{}' could not be populated", field),
            entity: entity.into(),
            source: Some(source),
        }
    }

    /// Wrap a driver error raised while performing `operation`.
    pub fn execution(operation: impl Into<String>, source: DriverError) -> Self {
        Self::Execution {
            operation: operation.into(),
            source,
        }
    }

    /// Create a transaction error: `rollback` failed while handling `original`.
    pub fn transaction(original: DbError, rollback: DriverError) -> Self {
        Self::Transaction {
            original: Box::new(original),
            rollback,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Mapping { .. })
    }

    /// True for driver failures, including failed rollbacks.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution { .. } | Self::Transaction { .. })
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction { .. })
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Execution { source, .. } => source.sql_state(),
            Self::Transaction { original, .. } => original.sql_state(),
            _ => None,
        }
    }
}

/// Result type alias for mapper operations.
pub type DbResult<T> = Result<T, DbError>;
