//! Query execution engine.
//!
//! Every operation follows the same lifecycle:
//! - check that parameters and placeholders agree
//! - open one connection through the factory
//! - prepare one statement, bind positionally, execute
//! - drain or abandon the cursor
//! - release statement, cursor and connection on every exit path
//!
//! The `*_on` functions run against an already-open connection and are shared
//! with [`TransactionBoundary`](crate::db::transaction::TransactionBoundary).

use crate::db::driver::{Connection, ConnectionFactory, ConnectionGuard, bind_all};
use crate::db::flavor::DatabaseFlavor;
use crate::db::sql::{call_statement, check_parameter_count};
use crate::error::{DbError, DbResult, DriverError};
use crate::models::{Row, StatementDescriptor, Value};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::debug;

/// Query executor that runs statement descriptors on fresh connections.
#[derive(Clone)]
pub struct QueryExecutor {
    factory: Arc<dyn ConnectionFactory>,
    flavor: DatabaseFlavor,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("flavor", &self.flavor)
            .finish_non_exhaustive()
    }
}

impl QueryExecutor {
    pub fn new(factory: Arc<dyn ConnectionFactory>, flavor: DatabaseFlavor) -> Self {
        Self { factory, flavor }
    }

    pub fn flavor(&self) -> DatabaseFlavor {
        self.flavor
    }

    pub fn factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.factory
    }

    /// Run a read statement and collect every row.
    pub fn query(&self, stmt: &StatementDescriptor) -> DbResult<Vec<Row>> {
        let mut rows = Vec::new();
        self.query_with(stmt, |row| {
            rows.push(row);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(rows)
    }

    /// Run a read statement and hand rows to `on_row` as they are fetched.
    ///
    /// Returning `ControlFlow::Break` stops fetching. The cursor and
    /// connection are released either way, and also when `on_row` fails.
    pub fn query_with<F>(&self, stmt: &StatementDescriptor, mut on_row: F) -> DbResult<()>
    where
        F: FnMut(Row) -> DbResult<ControlFlow<()>>,
    {
        self.with_connection(stmt, |conn| query_on(conn, stmt, &mut on_row))
    }

    /// First column of the first row, or `None` when there are no rows.
    pub fn scalar(&self, stmt: &StatementDescriptor) -> DbResult<Option<Value>> {
        self.with_connection(stmt, |conn| scalar_on(conn, stmt))
    }

    /// Run a write statement and return the affected-row count.
    pub fn execute(&self, stmt: &StatementDescriptor) -> DbResult<u64> {
        self.with_connection(stmt, |conn| execute_on(conn, stmt))
    }

    /// Run an INSERT and return the key the database generated for it.
    pub fn execute_returning_key(&self, stmt: &StatementDescriptor) -> DbResult<Value> {
        let flavor = self.flavor;
        self.with_connection(stmt, |conn| execute_returning_key_on(conn, stmt, flavor))
    }

    /// Call a stored routine and collect its result rows.
    pub fn call_query(&self, routine: &str, params: Vec<Value>) -> DbResult<Vec<Row>> {
        self.query(&call_statement(self.flavor, routine, params)?)
    }

    /// Call a stored routine and return the first column of its first row.
    pub fn call_scalar(&self, routine: &str, params: Vec<Value>) -> DbResult<Option<Value>> {
        self.scalar(&call_statement(self.flavor, routine, params)?)
    }

    /// Call a stored routine and return the affected-row count.
    pub fn call_execute(&self, routine: &str, params: Vec<Value>) -> DbResult<u64> {
        self.execute(&call_statement(self.flavor, routine, params)?)
    }

    fn with_connection<R>(
        &self,
        stmt: &StatementDescriptor,
        op: impl FnOnce(&mut dyn Connection) -> DbResult<R>,
    ) -> DbResult<R> {
        check_parameter_count(stmt, self.flavor)?;

        debug!(
            sql = %stmt.sql(),
            params = stmt.params().len(),
            flavor = %self.flavor,
            "Executing statement"
        );

        let mut conn = ConnectionGuard::open(self.factory.as_ref())?;
        // On error the guard closes the connection as it drops.
        let result = op(&mut *conn)?;
        conn.close()?;
        Ok(result)
    }
}

/// Stream the rows of `stmt` on `conn` into `on_row`.
pub fn query_on<F>(conn: &mut dyn Connection, stmt: &StatementDescriptor, on_row: F) -> DbResult<()>
where
    F: FnMut(Row) -> DbResult<ControlFlow<()>>,
{
    let mut on_row = on_row;
    let mut prepared = conn
        .prepare(stmt.sql())
        .map_err(|e| DbError::execution("prepare", e))?;
    bind_all(prepared.as_mut(), stmt.params()).map_err(|e| DbError::execution("bind", e))?;

    let mut cursor = prepared
        .query()
        .map_err(|e| DbError::execution("query", e))?;
    let mut fetched = 0usize;
    while let Some(row) = cursor
        .next_row()
        .map_err(|e| DbError::execution("fetch", e))?
    {
        fetched += 1;
        if on_row(row)?.is_break() {
            debug!(rows = fetched, "Row consumer stopped early");
            break;
        }
    }
    Ok(())
}

/// First column of the first row of `stmt` on `conn`.
pub fn scalar_on(conn: &mut dyn Connection, stmt: &StatementDescriptor) -> DbResult<Option<Value>> {
    let mut first = None;
    query_on(conn, stmt, |row| {
        first = row.get_index(0).cloned();
        Ok(ControlFlow::Break(()))
    })?;
    Ok(first)
}

/// Execute `stmt` on `conn` and return the affected-row count.
pub fn execute_on(conn: &mut dyn Connection, stmt: &StatementDescriptor) -> DbResult<u64> {
    let mut prepared = conn
        .prepare(stmt.sql())
        .map_err(|e| DbError::execution("prepare", e))?;
    bind_all(prepared.as_mut(), stmt.params()).map_err(|e| DbError::execution("bind", e))?;
    let rows_affected = prepared
        .execute()
        .map_err(|e| DbError::execution("execute", e))?;
    debug!(rows_affected = rows_affected, "Statement executed");
    Ok(rows_affected)
}

/// Execute an INSERT on `conn` and return its generated key.
///
/// On flavors with `RETURNING` the key is the first column of the first
/// returned row; otherwise it is whatever the driver reports after execute.
pub fn execute_returning_key_on(
    conn: &mut dyn Connection,
    stmt: &StatementDescriptor,
    flavor: DatabaseFlavor,
) -> DbResult<Value> {
    let key = if flavor.returns_generated_keys() {
        scalar_on(conn, stmt)?
    } else {
        let mut prepared = conn
            .prepare(stmt.sql())
            .map_err(|e| DbError::execution("prepare", e))?;
        bind_all(prepared.as_mut(), stmt.params()).map_err(|e| DbError::execution("bind", e))?;
        prepared
            .execute()
            .map_err(|e| DbError::execution("execute", e))?;
        prepared.generated_key()
    };

    match key {
        Some(key) if !key.is_null() => {
            debug!(key = ?key, "Generated key returned");
            Ok(key)
        }
        _ => Err(DbError::execution(
            "execute returning key",
            DriverError::new("driver reported no generated key"),
        )),
    }
}
