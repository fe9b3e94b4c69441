//! Result row to entity mapping.
//!
//! Mapping is strict: every column in the row must name a declared field
//! (exact, case-sensitive match) and every declared field must be present.
//! The instance is built in a scratch value and only handed back when all
//! fields were populated, so callers never see a half-filled entity.

use crate::error::{DbError, DbResult};
use crate::models::{Entity, Row, metadata};
use std::collections::HashSet;

/// Map one row onto a fresh `T`.
pub fn map_row<T: Entity>(row: Row) -> DbResult<T> {
    let meta = metadata::<T>()?;

    if let Some(missing) = meta
        .fields()
        .iter()
        .find(|f| !row.columns().iter().any(|c| c == f.name))
    {
        return Err(DbError::mapping(
            meta.type_name(),
            format!("result has no column for field '{}'", missing.name),
        ));
    }

    let mut seen = HashSet::with_capacity(row.len());
    let mut entity = T::default();
    for (column, value) in row.into_pairs() {
        let Some(field) = meta.field(&column) else {
            return Err(DbError::mapping(
                meta.type_name(),
                format!("column '{}' does not match any field", column),
            ));
        };
        if !seen.insert(field.name) {
            return Err(DbError::mapping(
                meta.type_name(),
                format!("column '{}' appears more than once", column),
            ));
        }
        entity
            .set_field(field.name, value)
            .map_err(|e| DbError::coercion(meta.type_name(), field.name, e))?;
    }

    Ok(entity)
}

/// Map every row, failing on the first row that does not map.
pub fn map_rows<T: Entity>(rows: Vec<Row>) -> DbResult<Vec<T>> {
    rows.into_iter().map(map_row::<T>).collect()
}
