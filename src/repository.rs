//! Caller-facing data access API.
//!
//! A [`Repository`] ties together a connection factory, the detected flavor
//! and the mapper configuration. Every call opens its own connection and
//! releases it before returning, so one repository can be shared between
//! threads.

use crate::config::{DatabaseUrl, MapperConfig};
use crate::db::driver::{ConnectionFactory, ConnectionGuard};
use crate::db::executor::QueryExecutor;
use crate::db::flavor::{self, DatabaseFlavor};
use crate::db::row_mapper::{map_row, map_rows};
use crate::db::schema::create_table_statement;
use crate::db::sql::SqlBuilder;
use crate::db::sqlx_driver::SqlxDriver;
use crate::db::transaction::{TransactionBoundary, run_batch, with_transaction};
use crate::error::{DbError, DbResult};
use crate::models::{Entity, ID_FIELD, Row, StatementDescriptor, Value, metadata};
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, info};

/// Entity-level operations over one database.
#[derive(Debug, Clone)]
pub struct Repository {
    executor: QueryExecutor,
    sql: SqlBuilder,
    config: MapperConfig,
}

impl Repository {
    /// Create a repository over `factory`.
    ///
    /// Uses `config.flavor` when set; otherwise opens one connection to ask
    /// the database.
    pub fn connect(factory: Arc<dyn ConnectionFactory>, config: MapperConfig) -> DbResult<Self> {
        config.validate().map_err(DbError::invalid_input)?;

        let flavor = match config.flavor {
            Some(flavor) => flavor,
            None => {
                let mut conn = ConnectionGuard::open(factory.as_ref())?;
                let flavor = flavor::detect_database_flavor(&mut *conn)?;
                conn.close()?;
                flavor
            }
        };

        info!(
            flavor = %flavor,
            table_naming = ?config.table_naming,
            batch_chunk_size = config.batch_chunk_size_or_default(),
            "Repository ready"
        );

        Ok(Self {
            executor: QueryExecutor::new(factory, flavor),
            sql: SqlBuilder::new(flavor, config.table_naming),
            config,
        })
    }

    /// Create a repository from a connection URL using the sqlx driver.
    ///
    /// Mapper options in the query string (`table_naming`,
    /// `batch_chunk_size`) are applied and stripped before connecting.
    pub fn open(url: &str) -> DbResult<Self> {
        let parsed = DatabaseUrl::parse(url).map_err(DbError::invalid_input)?;
        let driver = SqlxDriver::from_database_url(&parsed);
        Self::connect(Arc::new(driver), parsed.mapper)
    }

    pub fn flavor(&self) -> DatabaseFlavor {
        self.executor.flavor()
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn sql_builder(&self) -> &SqlBuilder {
        &self.sql
    }

    /// Ask a fresh connection which engine it talks to.
    pub fn detect_database_flavor(&self) -> DbResult<DatabaseFlavor> {
        let mut conn = ConnectionGuard::open(self.executor.factory().as_ref())?;
        let flavor = flavor::detect_database_flavor(&mut *conn)?;
        conn.close()?;
        Ok(flavor)
    }

    /// Insert `entity` and return its key.
    ///
    /// An explicit `id` is returned as given. A NULL `id` is left to the
    /// database and the generated key is returned. Entities without an `id`
    /// field yield `None`.
    pub fn insert<T: Entity>(&self, entity: &T) -> DbResult<Option<Value>> {
        let stmt = self.sql.insert_statement(entity)?;
        let meta = metadata::<T>()?;

        if meta.id_field().is_none() {
            self.executor.execute(&stmt)?;
            return Ok(None);
        }

        match entity.field_value(ID_FIELD) {
            Some(id) if !id.is_null() => {
                self.executor.execute(&stmt)?;
                Ok(Some(id))
            }
            _ => self.executor.execute_returning_key(&stmt).map(Some),
        }
    }

    pub fn update_by_id<T: Entity>(&self, entity: &T) -> DbResult<u64> {
        let stmt = self.sql.update_by_id_statement(entity)?;
        self.executor.execute(&stmt)
    }

    pub fn delete_by_id<T: Entity>(&self, id: impl Into<Value>) -> DbResult<u64> {
        let stmt = self.sql.delete_by_id_statement::<T>(id)?;
        self.executor.execute(&stmt)
    }

    /// Fetch the entity with `id`, or `None` when no row matches.
    pub fn select_by_id<T: Entity>(&self, id: impl Into<Value>) -> DbResult<Option<T>> {
        let stmt = self.sql.select_by_id_statement::<T>(id)?;
        let mut found = None;
        self.executor.query_with(&stmt, |row| {
            found = Some(map_row::<T>(row)?);
            Ok(ControlFlow::Break(()))
        })?;
        Ok(found)
    }

    pub fn select_all<T: Entity>(&self) -> DbResult<Vec<T>> {
        let stmt = self.sql.select_all_statement::<T>()?;
        map_rows(self.executor.query(&stmt)?)
    }

    /// Visit every `T` without materializing the whole table.
    pub fn for_each<T, F>(&self, mut visit: F) -> DbResult<()>
    where
        T: Entity,
        F: FnMut(T) -> DbResult<ControlFlow<()>>,
    {
        let stmt = self.sql.select_all_statement::<T>()?;
        self.executor.query_with(&stmt, |row| visit(map_row::<T>(row)?))
    }

    /// Raw SQL escape hatch returning untyped rows.
    pub fn query(&self, sql: &str, params: Vec<Value>) -> DbResult<Vec<Row>> {
        self.executor.query(&StatementDescriptor::new(sql, params))
    }

    /// Raw SQL mapped onto `T`.
    pub fn query_as<T: Entity>(&self, sql: &str, params: Vec<Value>) -> DbResult<Vec<T>> {
        map_rows(self.query(sql, params)?)
    }

    pub fn scalar(&self, sql: &str, params: Vec<Value>) -> DbResult<Option<Value>> {
        self.executor.scalar(&StatementDescriptor::new(sql, params))
    }

    pub fn execute(&self, sql: &str, params: Vec<Value>) -> DbResult<u64> {
        self.executor.execute(&StatementDescriptor::new(sql, params))
    }

    /// Apply `statements` atomically; see [`run_batch`].
    pub fn run_batch<S>(&self, statements: impl IntoIterator<Item = S>) -> DbResult<Vec<u64>>
    where
        S: Into<StatementDescriptor>,
    {
        let statements: Vec<StatementDescriptor> =
            statements.into_iter().map(Into::into).collect();
        if statements.is_empty() {
            debug!("Empty batch, nothing to run");
            return Ok(Vec::new());
        }
        run_batch(
            self.executor.factory().as_ref(),
            self.flavor(),
            self.config.batch_chunk_size_or_default(),
            &statements,
        )
    }

    /// Run `body` in one transaction: committed on `Ok`, rolled back on `Err`.
    pub fn in_transaction<R, F>(&self, body: F) -> DbResult<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> DbResult<R>,
    {
        with_transaction(
            self.executor.factory().as_ref(),
            self.flavor(),
            self.config.batch_chunk_size_or_default(),
            |boundary| {
                let mut tx = Transaction {
                    boundary,
                    sql: &self.sql,
                };
                body(&mut tx)
            },
        )
    }

    pub fn call_query(&self, routine: &str, params: Vec<Value>) -> DbResult<Vec<Row>> {
        self.executor.call_query(routine, params)
    }

    pub fn call_scalar(&self, routine: &str, params: Vec<Value>) -> DbResult<Option<Value>> {
        self.executor.call_scalar(routine, params)
    }

    pub fn call_execute(&self, routine: &str, params: Vec<Value>) -> DbResult<u64> {
        self.executor.call_execute(routine, params)
    }

    /// `CREATE TABLE IF NOT EXISTS` for `T` in this repository's dialect.
    pub fn create_table_statement<T: Entity>(&self) -> DbResult<String> {
        create_table_statement::<T>(self.flavor(), self.config.table_naming)
    }

    /// Create the table for `T` if it does not exist yet.
    pub fn create_table<T: Entity>(&self) -> DbResult<()> {
        let ddl = self.create_table_statement::<T>()?;
        self.executor.execute(&StatementDescriptor::raw(ddl))?;
        Ok(())
    }
}

/// Entity operations inside an open transaction.
///
/// Statements run in submission order on the transaction's connection.
pub struct Transaction<'t> {
    boundary: &'t mut TransactionBoundary,
    sql: &'t SqlBuilder,
}

impl Transaction<'_> {
    pub fn insert<T: Entity>(&mut self, entity: &T) -> DbResult<Option<Value>> {
        let stmt = self.sql.insert_statement(entity)?;
        let meta = metadata::<T>()?;

        if meta.id_field().is_none() {
            self.boundary.execute(&stmt)?;
            return Ok(None);
        }

        match entity.field_value(ID_FIELD) {
            Some(id) if !id.is_null() => {
                self.boundary.execute(&stmt)?;
                Ok(Some(id))
            }
            _ => self.boundary.execute_returning_key(&stmt).map(Some),
        }
    }

    pub fn update_by_id<T: Entity>(&mut self, entity: &T) -> DbResult<u64> {
        let stmt = self.sql.update_by_id_statement(entity)?;
        self.boundary.execute(&stmt)
    }

    pub fn delete_by_id<T: Entity>(&mut self, id: impl Into<Value>) -> DbResult<u64> {
        let stmt = self.sql.delete_by_id_statement::<T>(id)?;
        self.boundary.execute(&stmt)
    }

    pub fn select_by_id<T: Entity>(&mut self, id: impl Into<Value>) -> DbResult<Option<T>> {
        let stmt = self.sql.select_by_id_statement::<T>(id)?;
        let mut found = None;
        self.boundary.query_with(&stmt, |row| {
            found = Some(map_row::<T>(row)?);
            Ok(ControlFlow::Break(()))
        })?;
        Ok(found)
    }

    pub fn select_all<T: Entity>(&mut self) -> DbResult<Vec<T>> {
        let stmt = self.sql.select_all_statement::<T>()?;
        map_rows(self.boundary.query(&stmt)?)
    }

    pub fn query(&mut self, sql: &str, params: Vec<Value>) -> DbResult<Vec<Row>> {
        self.boundary.query(&StatementDescriptor::new(sql, params))
    }

    pub fn scalar(&mut self, sql: &str, params: Vec<Value>) -> DbResult<Option<Value>> {
        self.boundary.scalar(&StatementDescriptor::new(sql, params))
    }

    pub fn execute(&mut self, sql: &str, params: Vec<Value>) -> DbResult<u64> {
        self.boundary.execute(&StatementDescriptor::new(sql, params))
    }

    /// Underlying boundary, for explicit commit or rollback.
    pub fn boundary(&mut self) -> &mut TransactionBoundary {
        self.boundary
    }
}
