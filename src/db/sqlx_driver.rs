//! Blocking driver backed by sqlx.
//!
//! Each connection owns a current-thread tokio runtime and blocks on every
//! driver future, which turns sqlx's async API into the call/response seam in
//! [`crate::db::driver`]. The connection's sockets stay registered with that
//! runtime for their whole life.
//!
//! Do not call into this driver from inside an async runtime; `block_on`
//! panics there.

use crate::config::DatabaseUrl;
use crate::db::driver::{Connection, ConnectionFactory, Cursor, DriverResult, Statement};
use crate::db::flavor::DatabaseFlavor;
use crate::db::params::build_query;
use crate::db::types::{column_names, decode_row};
use crate::error::DriverError;
use crate::models::{Row, Value};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sqlx::AnyConnection;
use sqlx::any::AnyRow;
use sqlx::{Connection as _, Executor as _};
use std::sync::{Arc, Once};
use tokio::runtime::Runtime;
use tracing::{debug, warn};

static INSTALL_DRIVERS: Once = Once::new();

/// Connection factory over sqlx's `Any` driver (SQLite, PostgreSQL, MySQL).
pub struct SqlxDriver {
    /// Sensitive - never logged
    url: String,
    flavor: DatabaseFlavor,
}

impl std::fmt::Debug for SqlxDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxDriver")
            .field("flavor", &self.flavor)
            .finish_non_exhaustive()
    }
}

impl SqlxDriver {
    /// Create a factory for `url`. No connection is opened yet.
    pub fn new(url: impl Into<String>) -> Self {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);
        let url = url.into();
        let flavor = DatabaseFlavor::from_connection_string(&url);
        Self { url, flavor }
    }

    /// Create a factory from a parsed URL, whose mapper options are already
    /// stripped.
    pub fn from_database_url(url: &DatabaseUrl) -> Self {
        Self::new(url.connection_string.clone())
    }

    /// Flavor implied by the URL scheme.
    pub fn flavor(&self) -> DatabaseFlavor {
        self.flavor
    }
}

impl ConnectionFactory for SqlxDriver {
    fn open(&self) -> DriverResult<Box<dyn Connection>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DriverError::new(format!("Failed to start runtime: {}", e)).with_source(e))?;
        let inner = runtime.block_on(AnyConnection::connect(&self.url))?;
        debug!(flavor = %self.flavor, "Opened connection");

        Ok(Box::new(SqlxConnection {
            inner,
            runtime,
            flavor: self.flavor,
            auto_commit: true,
            tx_open: false,
        }))
    }
}

/// One sqlx connection driven by its own runtime.
///
/// Auto-commit off is emulated: the first statement after
/// `set_auto_commit(false)` (or after a commit/rollback) issues `BEGIN`.
pub struct SqlxConnection {
    // Dropped before the runtime it is registered with.
    inner: AnyConnection,
    runtime: Runtime,
    flavor: DatabaseFlavor,
    auto_commit: bool,
    tx_open: bool,
}

impl SqlxConnection {
    fn run_control(&mut self, sql: &'static str) -> DriverResult<()> {
        self.runtime.block_on(self.inner.execute(sql))?;
        Ok(())
    }

    fn begin_if_needed(&mut self) -> DriverResult<()> {
        if self.auto_commit || self.tx_open {
            return Ok(());
        }
        let begin = match self.flavor {
            DatabaseFlavor::MySql => "START TRANSACTION",
            _ => "BEGIN",
        };
        self.run_control(begin)?;
        self.tx_open = true;
        Ok(())
    }
}

impl Connection for SqlxConnection {
    fn product_name(&mut self) -> DriverResult<String> {
        Ok(self.inner.backend_name().to_string())
    }

    fn prepare<'c>(&'c mut self, sql: &str) -> DriverResult<Box<dyn Statement + 'c>> {
        Ok(Box::new(SqlxStatement {
            conn: self,
            sql: sql.to_string(),
            params: Vec::new(),
            last_insert_id: None,
        }))
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        if enabled && self.tx_open {
            self.run_control("COMMIT")?;
            self.tx_open = false;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        if self.tx_open {
            self.run_control("COMMIT")?;
            self.tx_open = false;
        }
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        if self.tx_open {
            self.run_control("ROLLBACK")?;
            self.tx_open = false;
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) -> DriverResult<()> {
        if self.tx_open {
            if let Err(e) = self.run_control("ROLLBACK") {
                warn!(error = %e, "Failed to roll back open transaction on close");
            }
        }
        let SqlxConnection { inner, runtime, .. } = *self;
        runtime.block_on(inner.close())?;
        debug!("Closed connection");
        Ok(())
    }
}

struct SqlxStatement<'c> {
    conn: &'c mut SqlxConnection,
    sql: String,
    /// Bound values, slot `n - 1` for placeholder `n`
    params: Vec<Value>,
    last_insert_id: Option<i64>,
}

impl Statement for SqlxStatement<'_> {
    fn bind(&mut self, index: usize, value: &Value) -> DriverResult<()> {
        if index == 0 {
            return Err(DriverError::new("Parameter indexes start at 1"));
        }
        if self.params.len() < index {
            self.params.resize(index, Value::Null);
        }
        self.params[index - 1] = value.clone();
        Ok(())
    }

    fn execute(&mut self) -> DriverResult<u64> {
        self.conn.begin_if_needed()?;
        let SqlxConnection { inner, runtime, .. } = &mut *self.conn;

        // When params is empty, use raw SQL to avoid prepared statement issues
        let result = if self.params.is_empty() {
            runtime.block_on(inner.execute(self.sql.as_str()))?
        } else {
            runtime.block_on(build_query(&self.sql, &self.params).execute(inner))?
        };

        self.last_insert_id = result.last_insert_id();
        Ok(result.rows_affected())
    }

    fn query<'s>(&'s mut self) -> DriverResult<Box<dyn Cursor + 's>> {
        self.conn.begin_if_needed()?;
        let SqlxConnection { inner, runtime, .. } = &mut *self.conn;

        let stream = if self.params.is_empty() {
            inner.fetch(self.sql.as_str())
        } else {
            build_query(&self.sql, &self.params).fetch(inner)
        };

        Ok(Box::new(SqlxCursor {
            runtime,
            stream,
            columns: None,
        }))
    }

    fn generated_key(&self) -> Option<Value> {
        self.last_insert_id.map(Value::Int)
    }
}

struct SqlxCursor<'s> {
    runtime: &'s Runtime,
    stream: BoxStream<'s, Result<AnyRow, sqlx::Error>>,
    /// Shared by every row, captured from the first one
    columns: Option<Arc<[String]>>,
}

impl Cursor for SqlxCursor<'_> {
    fn next_row(&mut self) -> DriverResult<Option<Row>> {
        match self.runtime.block_on(self.stream.next()) {
            None => Ok(None),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(row)) => {
                let columns = self
                    .columns
                    .get_or_insert_with(|| column_names(&row))
                    .clone();
                decode_row(&row, columns).map(Some)
            }
        }
    }
}
