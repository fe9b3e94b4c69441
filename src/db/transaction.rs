//! Explicit transaction boundaries and atomic batches.
//!
//! A [`TransactionBoundary`] owns one connection for its whole life and moves
//! through `Idle -> Open -> {Committed | RolledBack} -> Closed`. Statements can
//! only be submitted while `Open`; terminal states are final.

use crate::config::DEFAULT_BATCH_CHUNK_SIZE;
use crate::db::driver::{Connection, ConnectionFactory, ConnectionGuard};
use crate::db::executor::{execute_on, execute_returning_key_on, query_on, scalar_on};
use crate::db::flavor::DatabaseFlavor;
use crate::db::sql::check_parameter_count;
use crate::error::{DbError, DbResult};
use crate::models::{Row, StatementDescriptor, Value};
use std::ops::ControlFlow;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Lifecycle state of a [`TransactionBoundary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    /// Auto-commit off, statements accepted
    Open,
    Committed,
    RolledBack,
    /// Auto-commit restored and connection released
    Closed,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One transaction on one dedicated connection.
pub struct TransactionBoundary {
    conn: Option<ConnectionGuard>,
    state: TransactionState,
    flavor: DatabaseFlavor,
    chunk_size: usize,
    /// Auto-commit setting to put back on close, captured by `begin`
    saved_auto_commit: Option<bool>,
    submitted: usize,
    started_at: Instant,
}

impl std::fmt::Debug for TransactionBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionBoundary")
            .field("state", &self.state)
            .field("flavor", &self.flavor)
            .field("chunk_size", &self.chunk_size)
            .field("submitted", &self.submitted)
            .finish()
    }
}

impl TransactionBoundary {
    /// Wrap `conn` in an idle boundary.
    pub fn new(conn: ConnectionGuard, flavor: DatabaseFlavor) -> Self {
        Self {
            conn: Some(conn),
            state: TransactionState::Idle,
            flavor,
            chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
            saved_auto_commit: None,
            submitted: 0,
            started_at: Instant::now(),
        }
    }

    /// Statements per driver batch call in [`submit_batch`](Self::submit_batch).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn flavor(&self) -> DatabaseFlavor {
        self.flavor
    }

    /// Number of statements that ran successfully so far.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Turn auto-commit off and start accepting statements.
    pub fn begin(&mut self) -> DbResult<()> {
        if self.state != TransactionState::Idle {
            return Err(self.wrong_state("begin"));
        }
        let conn = self.connection()?;
        let previous = conn.auto_commit();
        conn.set_auto_commit(false)
            .map_err(|e| DbError::execution("begin transaction", e))?;

        self.saved_auto_commit = Some(previous);
        self.state = TransactionState::Open;
        self.started_at = Instant::now();
        debug!(flavor = %self.flavor, "Transaction started");
        Ok(())
    }

    pub fn execute(&mut self, stmt: &StatementDescriptor) -> DbResult<u64> {
        self.prepare_submit(stmt)?;
        let affected = execute_on(self.connection()?, stmt)?;
        self.submitted += 1;
        Ok(affected)
    }

    pub fn execute_returning_key(&mut self, stmt: &StatementDescriptor) -> DbResult<Value> {
        self.prepare_submit(stmt)?;
        let flavor = self.flavor;
        let key = execute_returning_key_on(self.connection()?, stmt, flavor)?;
        self.submitted += 1;
        Ok(key)
    }

    pub fn query(&mut self, stmt: &StatementDescriptor) -> DbResult<Vec<Row>> {
        let mut rows = Vec::new();
        self.query_with(stmt, |row| {
            rows.push(row);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(rows)
    }

    pub fn query_with<F>(&mut self, stmt: &StatementDescriptor, on_row: F) -> DbResult<()>
    where
        F: FnMut(Row) -> DbResult<ControlFlow<()>>,
    {
        self.prepare_submit(stmt)?;
        query_on(self.connection()?, stmt, on_row)?;
        self.submitted += 1;
        Ok(())
    }

    pub fn scalar(&mut self, stmt: &StatementDescriptor) -> DbResult<Option<Value>> {
        self.prepare_submit(stmt)?;
        let value = scalar_on(self.connection()?, stmt)?;
        self.submitted += 1;
        Ok(value)
    }

    /// Submit `statements` in order, `chunk_size` at a time.
    ///
    /// Chunks are a buffering limit only; nothing is committed between them.
    /// Every statement's parameter count is checked before the first chunk
    /// is sent.
    pub fn submit_batch(&mut self, statements: &[StatementDescriptor]) -> DbResult<Vec<u64>> {
        if self.state != TransactionState::Open {
            return Err(self.wrong_state("submit statements"));
        }
        for stmt in statements {
            check_parameter_count(stmt, self.flavor)?;
        }

        let chunk_size = self.chunk_size;
        let mut counts = Vec::with_capacity(statements.len());
        for (idx, chunk) in statements.chunks(chunk_size).enumerate() {
            debug!(chunk = idx, size = chunk.len(), "Submitting batch chunk");
            let chunk_counts = self
                .connection()?
                .execute_batch(chunk)
                .map_err(|e| DbError::execution("batch", e))?;
            self.submitted += chunk.len();
            counts.extend(chunk_counts);
        }
        Ok(counts)
    }

    /// Commit everything submitted since `begin`.
    pub fn commit(&mut self) -> DbResult<()> {
        if self.state != TransactionState::Open {
            return Err(self.wrong_state("commit"));
        }
        self.connection()?
            .commit()
            .map_err(|e| DbError::execution("commit", e))?;
        self.state = TransactionState::Committed;
        info!(
            statements = self.submitted,
            duration_ms = self.started_at.elapsed().as_millis() as u64,
            "Transaction committed"
        );
        Ok(())
    }

    /// Discard everything submitted since `begin`.
    pub fn rollback(&mut self) -> DbResult<()> {
        if self.state != TransactionState::Open {
            return Err(self.wrong_state("roll back"));
        }
        self.connection()?
            .rollback()
            .map_err(|e| DbError::execution("rollback", e))?;
        self.state = TransactionState::RolledBack;
        info!(statements = self.submitted, "Transaction rolled back");
        Ok(())
    }

    /// Roll back after `original` failed and return the error to report.
    ///
    /// If the rollback itself fails, both errors come back as a
    /// `DbError::Transaction`. A boundary that is no longer open has
    /// nothing to undo and `original` is returned as is.
    pub fn rollback_on_error(&mut self, original: DbError) -> DbError {
        if self.state != TransactionState::Open {
            return original;
        }
        let result = match self.conn.as_mut() {
            Some(conn) => conn.rollback(),
            None => return original,
        };
        match result {
            Ok(()) => {
                self.state = TransactionState::RolledBack;
                info!(error = %original, "Transaction rolled back after failure");
                original
            }
            Err(rollback_err) => {
                warn!(
                    error = %original,
                    rollback_error = %rollback_err,
                    "Rollback failed; transaction state unknown"
                );
                DbError::transaction(original, rollback_err)
            }
        }
    }

    /// Restore auto-commit and close the connection.
    ///
    /// A boundary that is still open is rolled back first. If that rollback
    /// fails, auto-commit is left off and the connection is closed as is.
    pub fn close(mut self) -> DbResult<()> {
        let rollback = if self.state == TransactionState::Open {
            warn!("Closing an open transaction; rolling back");
            self.rollback()
        } else {
            Ok(())
        };
        let restore = self.restore_auto_commit();
        self.state = TransactionState::Closed;

        let close = match self.conn.take() {
            Some(conn) => conn.close(),
            None => Ok(()),
        };
        rollback.and(restore).and(close)
    }

    /// Put back the auto-commit mode seen at `begin`.
    ///
    /// Only a finished transaction may do so: turning auto-commit on over an
    /// unresolved one would commit it.
    fn restore_auto_commit(&mut self) -> DbResult<()> {
        let Some(previous) = self.saved_auto_commit.take() else {
            return Ok(());
        };
        if !matches!(
            self.state,
            TransactionState::Committed | TransactionState::RolledBack
        ) {
            warn!(state = %self.state, "Transaction unresolved; leaving auto-commit off");
            return Ok(());
        }
        match self.conn.as_mut() {
            Some(conn) => conn
                .set_auto_commit(previous)
                .map_err(|e| DbError::execution("restore auto-commit", e)),
            None => Ok(()),
        }
    }

    fn prepare_submit(&mut self, stmt: &StatementDescriptor) -> DbResult<()> {
        if self.state != TransactionState::Open {
            return Err(self.wrong_state("submit statements"));
        }
        check_parameter_count(stmt, self.flavor)?;
        debug!(
            sql = %stmt.sql(),
            params = stmt.params().len(),
            "Executing statement in transaction"
        );
        Ok(())
    }

    fn connection(&mut self) -> DbResult<&mut dyn Connection> {
        match self.conn.as_mut() {
            Some(conn) => Ok(&mut **conn),
            None => Err(DbError::invalid_input(
                "transaction connection already released",
            )),
        }
    }

    fn wrong_state(&self, action: &str) -> DbError {
        DbError::invalid_input(format!(
            "cannot {} while transaction is {}",
            action, self.state
        ))
    }
}

impl Drop for TransactionBoundary {
    fn drop(&mut self) {
        if self.conn.is_none() {
            return;
        }
        if self.state == TransactionState::Open {
            warn!("Transaction dropped while open; rolling back");
            if let Err(e) = self.rollback() {
                warn!(error = %e, "Rollback on drop failed");
            }
        }
        if let Err(e) = self.restore_auto_commit() {
            warn!(error = %e, "Failed to restore auto-commit on drop");
        }
        // The connection guard closes the connection as it drops.
    }
}

/// Run `body` inside a transaction on a fresh connection.
///
/// Commits when `body` returns `Ok` (unless it already ended the transaction
/// itself) and rolls back when it returns `Err`.
pub fn with_transaction<R, F>(
    factory: &dyn ConnectionFactory,
    flavor: DatabaseFlavor,
    chunk_size: usize,
    body: F,
) -> DbResult<R>
where
    F: FnOnce(&mut TransactionBoundary) -> DbResult<R>,
{
    let conn = ConnectionGuard::open(factory)?;
    let mut tx = TransactionBoundary::new(conn, flavor).with_chunk_size(chunk_size);
    tx.begin()?;

    let outcome = body(&mut tx).and_then(|value| {
        if tx.state() == TransactionState::Open {
            tx.commit()?;
        }
        Ok(value)
    });

    match outcome {
        Ok(value) => {
            tx.close()?;
            Ok(value)
        }
        Err(e) => {
            let err = tx.rollback_on_error(e);
            if let Err(close_err) = tx.close() {
                warn!(error = %close_err, "Failed to close connection after rollback");
            }
            Err(err)
        }
    }
}

/// Apply `statements` atomically and return one affected-row count each.
///
/// Either every statement takes effect or none does.
pub fn run_batch(
    factory: &dyn ConnectionFactory,
    flavor: DatabaseFlavor,
    chunk_size: usize,
    statements: &[StatementDescriptor],
) -> DbResult<Vec<u64>> {
    for stmt in statements {
        check_parameter_count(stmt, flavor)?;
    }

    info!(
        statements = statements.len(),
        chunk_size = chunk_size,
        "Running batch"
    );
    with_transaction(factory, flavor, chunk_size, |tx| tx.submit_batch(statements))
}
