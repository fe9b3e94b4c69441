//! Blocking database driver seam.
//!
//! The mapper never talks to a database directly. It goes through these
//! traits, which model a classic call/response driver:
//! - [`ConnectionFactory`] opens connections
//! - [`Connection`] prepares statements and controls transactions
//! - [`Statement`] binds positional parameters and executes
//! - [`Cursor`] yields result rows one at a time
//!
//! Statement and cursor handles borrow their parent, so they are always
//! released before the connection can be closed or reused.

use crate::error::{DbError, DbResult, DriverError};
use crate::models::{Row, StatementDescriptor, Value};
use std::ops::{Deref, DerefMut};
use tracing::warn;

pub type DriverResult<T> = Result<T, DriverError>;

/// Source of fresh connections.
///
/// Pooling, if any, lives behind this trait.
pub trait ConnectionFactory: Send + Sync {
    fn open(&self) -> DriverResult<Box<dyn Connection>>;
}

/// One live database connection.
///
/// A connection is used by one operation at a time and is never shared
/// between threads while in use.
pub trait Connection: Send {
    /// Engine product name, e.g. "PostgreSQL".
    fn product_name(&mut self) -> DriverResult<String>;

    /// Prepare `sql`, which uses positional placeholders.
    fn prepare<'c>(&'c mut self, sql: &str) -> DriverResult<Box<dyn Statement + 'c>>;

    /// Execute several statements, returning one affected-row count each.
    ///
    /// Stops at the first failure.
    fn execute_batch(&mut self, statements: &[StatementDescriptor]) -> DriverResult<Vec<u64>> {
        let mut counts = Vec::with_capacity(statements.len());
        for descriptor in statements {
            let mut stmt = self.prepare(descriptor.sql())?;
            bind_all(stmt.as_mut(), descriptor.params())?;
            counts.push(stmt.execute()?);
        }
        Ok(counts)
    }

    fn auto_commit(&self) -> bool;

    /// Disabling auto-commit opens a transaction that lasts until
    /// [`commit`](Self::commit) or [`rollback`](Self::rollback).
    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()>;

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;

    fn close(self: Box<Self>) -> DriverResult<()>;
}

/// A prepared statement.
pub trait Statement {
    /// Bind `value` to the 1-based placeholder `index`.
    fn bind(&mut self, index: usize, value: &Value) -> DriverResult<()>;

    /// Execute and return the affected-row count.
    fn execute(&mut self) -> DriverResult<u64>;

    /// Execute and open a cursor over the result rows.
    fn query<'s>(&'s mut self) -> DriverResult<Box<dyn Cursor + 's>>;

    /// Key generated by the last `execute`, if the driver reported one.
    fn generated_key(&self) -> Option<Value>;
}

/// Forward-only result cursor.
pub trait Cursor {
    fn next_row(&mut self) -> DriverResult<Option<Row>>;
}

/// Bind every parameter in order.
pub fn bind_all(stmt: &mut dyn Statement, params: &[Value]) -> DriverResult<()> {
    for (idx, param) in params.iter().enumerate() {
        stmt.bind(idx + 1, param)?;
    }
    Ok(())
}

/// RAII guard for an open connection.
///
/// Closes the connection when dropped, so every exit path releases it.
/// Prefer [`close`](Self::close), which reports close failures instead of
/// only logging them.
pub struct ConnectionGuard {
    conn: Option<Box<dyn Connection>>,
}

impl std::fmt::Debug for ConnectionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("open", &self.conn.is_some())
            .finish()
    }
}

impl ConnectionGuard {
    /// Open a connection from `factory`.
    pub fn open(factory: &dyn ConnectionFactory) -> DbResult<Self> {
        let conn = factory
            .open()
            .map_err(|e| DbError::execution("open connection", e))?;
        Ok(Self { conn: Some(conn) })
    }

    pub fn new(conn: Box<dyn Connection>) -> Self {
        Self { conn: Some(conn) }
    }

    /// Explicitly close the connection.
    pub fn close(mut self) -> DbResult<()> {
        match self.conn.take() {
            Some(conn) => conn
                .close()
                .map_err(|e| DbError::execution("close connection", e)),
            None => Ok(()),
        }
    }
}

impl Deref for ConnectionGuard {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        // Only `close` and `drop` take the connection out, and both consume the guard.
        self.conn.as_deref().expect("connection guard used after close")
    }
}

impl DerefMut for ConnectionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("connection guard used after close")
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close() {
                warn!(error = %e, "Failed to close connection released via Drop");
            }
        }
    }
}
