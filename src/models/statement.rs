//! Statement and row data models.

use crate::models::value::Value;
use std::sync::Arc;

/// SQL text plus its positional parameters.
///
/// Built once by the SQL synthesizer (or by callers for raw SQL) and consumed
/// by the executor. Fields are private so the pair cannot drift apart.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementDescriptor {
    sql: String,
    params: Vec<Value>,
}

impl StatementDescriptor {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}

impl From<&str> for StatementDescriptor {
    fn from(sql: &str) -> Self {
        Self::raw(sql)
    }
}

impl From<String> for StatementDescriptor {
    fn from(sql: String) -> Self {
        Self::raw(sql)
    }
}

/// One result record: column names in driver order with their raw values.
///
/// Column names are shared between all rows of one result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row. `values` must line up with `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the column named exactly `column`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn get_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Consume the row into `(column, value)` pairs in driver order.
    pub fn into_pairs(self) -> impl Iterator<Item = (String, Value)> {
        let columns = self.columns;
        self.values
            .into_iter()
            .enumerate()
            .map(move |(idx, value)| (columns[idx].clone(), value))
    }

    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| (column.clone(), value.to_json()))
            .collect()
    }
}
