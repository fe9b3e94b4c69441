//! Parameter binding for sqlx queries.
//!
//! Binds mapper [`Value`]s to sqlx `Any` queries. Timestamps go over the
//! wire as text in [`TIMESTAMP_TEXT_FORMAT`], since the `Any` driver has no
//! date/time type of its own.

use crate::models::Value;
use crate::models::value::TIMESTAMP_TEXT_FORMAT;
use sqlx::Any;
use sqlx::any::AnyArguments;
use sqlx::query::Query;

/// Bind a parameter to an `Any` query.
pub(crate) fn bind_any_param<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    param: &'q Value,
) -> Query<'q, Any, AnyArguments<'q>> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Timestamp(v) => query.bind(v.format(TIMESTAMP_TEXT_FORMAT).to_string()),
    }
}

/// Build an `Any` query for `sql` with `params` bound in order.
pub(crate) fn build_query<'q>(sql: &'q str, params: &'q [Value]) -> Query<'q, Any, AnyArguments<'q>> {
    params
        .iter()
        .fold(sqlx::query::<Any>(sql), |query, param| bind_any_param(query, param))
}
