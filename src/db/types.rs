//! Row decoding for the sqlx driver.
//!
//! Decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies the column's reported type name
//! 2. the value is extracted as the category's Rust type, falling back to
//!    the other scalar types when the driver disagrees with the type name
//!
//! NULL is checked on the raw value before any typed decode.

use crate::error::DriverError;
use crate::models::{Row, Value};
use sqlx::any::AnyRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::sync::Arc;

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Exact decimals are kept as text so no precision is lost.
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Text;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower.contains("clob") {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Column names of `row`, in driver order.
pub fn column_names(row: &AnyRow) -> Arc<[String]> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode every column of `row`.
pub fn decode_row(row: &AnyRow, columns: Arc<[String]>) -> Result<Row, DriverError> {
    let values = (0..row.columns().len())
        .map(|idx| decode_column(row, idx))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Row::new(columns, values))
}

fn decode_column(row: &AnyRow, idx: usize) -> Result<Value, DriverError> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let column = &row.columns()[idx];
    let type_name = column.type_info().name();
    let first = match categorize_type(type_name) {
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Binary => decode_binary(row, idx),
        TypeCategory::Text | TypeCategory::Unknown => decode_text(row, idx),
    };

    first
        .or_else(|| decode_integer(row, idx))
        .or_else(|| decode_float(row, idx))
        .or_else(|| decode_text(row, idx))
        .or_else(|| decode_binary(row, idx))
        .or_else(|| decode_boolean(row, idx))
        .ok_or_else(|| {
            DriverError::new(format!(
                "Unsupported type {} for column '{}'",
                type_name,
                column.name()
            ))
        })
}

fn decode_integer(row: &AnyRow, idx: usize) -> Option<Value> {
    row.try_get::<i64, _>(idx).ok().map(Value::Int)
}

fn decode_float(row: &AnyRow, idx: usize) -> Option<Value> {
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Some(Value::Float(v));
    }
    row.try_get::<f32, _>(idx)
        .ok()
        .map(|v| Value::Float(v as f64))
}

fn decode_boolean(row: &AnyRow, idx: usize) -> Option<Value> {
    row.try_get::<bool, _>(idx).ok().map(Value::Bool)
}

fn decode_text(row: &AnyRow, idx: usize) -> Option<Value> {
    row.try_get::<String, _>(idx).ok().map(Value::Text)
}

fn decode_binary(row: &AnyRow, idx: usize) -> Option<Value> {
    row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes)
}
