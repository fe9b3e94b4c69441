//! Shared test fixtures: a temporary SQLite database and a recording stub driver.

#![allow(dead_code)]

use db_mapper::db::{Connection, ConnectionFactory, Cursor, DriverResult, Statement};
use db_mapper::{DriverError, Row, StatementDescriptor, Value};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route library logs to the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// =============================================================================
// SQLite fixture
// =============================================================================

/// A SQLite database file that lives as long as the fixture.
pub struct TestDb {
    _dir: TempDir,
    pub url: String,
}

impl TestDb {
    pub fn new() -> Self {
        Self::with_options("")
    }

    /// `options` is appended to the query string, e.g. `&table_naming=singular`.
    pub fn with_options(options: &str) -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let url = format!("sqlite:{}?mode=rwc{}", path.to_str().unwrap(), options);
        Self { _dir: dir, url }
    }
}

// =============================================================================
// Recording stub driver
// =============================================================================

/// Counters shared by every connection a [`StubDriver`] opens.
#[derive(Debug, Default)]
pub struct Recorder {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub prepared: AtomicUsize,
    pub executed: AtomicUsize,
    pub queried: AtomicUsize,
    pub batches: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
    /// Statement and cursor handles currently alive
    pub open_handles: AtomicIsize,
    pub auto_commit_changes: Mutex<Vec<bool>>,
    pub sql: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        Self::count(&self.opened)
    }

    pub fn closed(&self) -> usize {
        Self::count(&self.closed)
    }

    pub fn executed(&self) -> usize {
        Self::count(&self.executed)
    }

    pub fn open_handles(&self) -> isize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn sql(&self) -> Vec<String> {
        self.sql.lock().unwrap().clone()
    }
}

/// Behaviour knobs for the stub.
#[derive(Debug, Clone, Default)]
pub struct StubBehavior {
    pub product_name: String,
    /// Fail `execute` and `query` for SQL containing this text
    pub fail_on: Option<String>,
    pub fail_rollback: bool,
    /// Rows handed out by every query
    pub rows: Vec<Row>,
    /// Key reported after every execute
    pub generated_key: Option<Value>,
}

pub struct StubDriver {
    pub recorder: Arc<Recorder>,
    pub behavior: StubBehavior,
}

impl StubDriver {
    pub fn new(product_name: &str) -> Self {
        init_tracing();
        Self {
            recorder: Arc::new(Recorder::default()),
            behavior: StubBehavior {
                product_name: product_name.to_string(),
                ..StubBehavior::default()
            },
        }
    }

    pub fn failing_on(mut self, sql_fragment: &str) -> Self {
        self.behavior.fail_on = Some(sql_fragment.to_string());
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.behavior.fail_rollback = true;
        self
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.behavior.rows = rows;
        self
    }

    pub fn with_generated_key(mut self, key: Value) -> Self {
        self.behavior.generated_key = Some(key);
        self
    }
}

impl ConnectionFactory for StubDriver {
    fn open(&self) -> DriverResult<Box<dyn Connection>> {
        self.recorder.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubConnection {
            recorder: Arc::clone(&self.recorder),
            behavior: self.behavior.clone(),
            auto_commit: true,
        }))
    }
}

struct StubConnection {
    recorder: Arc<Recorder>,
    behavior: StubBehavior,
    auto_commit: bool,
}

impl StubConnection {
    fn check(&self, sql: &str) -> DriverResult<()> {
        match &self.behavior.fail_on {
            Some(fragment) if sql.contains(fragment.as_str()) => {
                Err(DriverError::new(format!("stub failure on: {}", sql)).with_sql_state("42703"))
            }
            _ => Ok(()),
        }
    }
}

impl Connection for StubConnection {
    fn product_name(&mut self) -> DriverResult<String> {
        Ok(self.behavior.product_name.clone())
    }

    fn prepare<'c>(&'c mut self, sql: &str) -> DriverResult<Box<dyn Statement + 'c>> {
        self.recorder.prepared.fetch_add(1, Ordering::SeqCst);
        self.recorder.open_handles.fetch_add(1, Ordering::SeqCst);
        self.recorder.sql.lock().unwrap().push(sql.to_string());
        Ok(Box::new(StubStatement {
            conn: self,
            sql: sql.to_string(),
            params: Vec::new(),
        }))
    }

    fn execute_batch(&mut self, statements: &[StatementDescriptor]) -> DriverResult<Vec<u64>> {
        self.recorder.batches.fetch_add(1, Ordering::SeqCst);
        let mut counts = Vec::with_capacity(statements.len());
        for stmt in statements {
            self.recorder.sql.lock().unwrap().push(stmt.sql().to_string());
            self.check(stmt.sql())?;
            self.recorder.executed.fetch_add(1, Ordering::SeqCst);
            counts.push(1);
        }
        Ok(counts)
    }

    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn set_auto_commit(&mut self, enabled: bool) -> DriverResult<()> {
        self.auto_commit = enabled;
        self.recorder.auto_commit_changes.lock().unwrap().push(enabled);
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.recorder.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.recorder.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.behavior.fail_rollback {
            return Err(DriverError::new("stub rollback failure: connection reset"));
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> DriverResult<()> {
        self.recorder.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct StubStatement<'c> {
    conn: &'c mut StubConnection,
    sql: String,
    params: Vec<Value>,
}

impl Statement for StubStatement<'_> {
    fn bind(&mut self, index: usize, value: &Value) -> DriverResult<()> {
        assert_eq!(index, self.params.len() + 1, "parameters bound out of order");
        self.params.push(value.clone());
        Ok(())
    }

    fn execute(&mut self) -> DriverResult<u64> {
        self.conn.check(&self.sql)?;
        self.conn.recorder.executed.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    fn query<'s>(&'s mut self) -> DriverResult<Box<dyn Cursor + 's>> {
        self.conn.check(&self.sql)?;
        self.conn.recorder.queried.fetch_add(1, Ordering::SeqCst);
        self.conn.recorder.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubCursor {
            recorder: Arc::clone(&self.conn.recorder),
            rows: self.conn.behavior.rows.clone().into_iter(),
        }))
    }

    fn generated_key(&self) -> Option<Value> {
        self.conn.behavior.generated_key.clone()
    }
}

impl Drop for StubStatement<'_> {
    fn drop(&mut self) {
        self.conn.recorder.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

struct StubCursor {
    recorder: Arc<Recorder>,
    rows: std::vec::IntoIter<Row>,
}

impl Cursor for StubCursor {
    fn next_row(&mut self) -> DriverResult<Option<Row>> {
        Ok(self.rows.next())
    }
}

impl Drop for StubCursor {
    fn drop(&mut self) {
        self.recorder.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Build a row from column names and values.
pub fn row(columns: &[&str], values: Vec<Value>) -> Row {
    let columns: Arc<[String]> = columns.iter().map(|c| c.to_string()).collect();
    Row::new(columns, values)
}
