//! DDL export from entity metadata.
//!
//! A best-effort reporting helper: it renders `CREATE TABLE` text and never
//! executes anything itself. Column types are limited to what the sqlx `Any`
//! driver can decode, so timestamps and dates are stored as text.

use crate::config::TableNaming;
use crate::db::flavor::DatabaseFlavor;
use crate::error::DbResult;
use crate::models::{Entity, FieldDescriptor, FieldKind, ID_FIELD, metadata};

/// `CREATE TABLE IF NOT EXISTS` for `T`.
///
/// A field named `id` becomes the auto-generated primary key.
pub fn create_table_statement<T: Entity>(
    flavor: DatabaseFlavor,
    naming: TableNaming,
) -> DbResult<String> {
    let meta = metadata::<T>()?;
    let columns: Vec<String> = meta
        .fields()
        .iter()
        .map(|field| column_definition(field, flavor))
        .collect();

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        flavor.quote_identifier(&meta.table_name(naming)),
        columns.join(", ")
    ))
}

fn column_definition(field: &FieldDescriptor, flavor: DatabaseFlavor) -> String {
    let name = flavor.quote_identifier(field.name);
    if field.name == ID_FIELD && field.kind == FieldKind::Integer {
        return format!("{} {}", name, id_column_type(flavor));
    }

    let null = if field.nullable { "" } else { " NOT NULL" };
    format!("{} {}{}", name, column_type(field.kind, flavor), null)
}

fn id_column_type(flavor: DatabaseFlavor) -> &'static str {
    match flavor {
        DatabaseFlavor::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        DatabaseFlavor::PostgreSql => "BIGSERIAL PRIMARY KEY",
        DatabaseFlavor::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
        DatabaseFlavor::Unknown => "BIGINT PRIMARY KEY",
    }
}

/// Column type for a field kind.
pub fn column_type(kind: FieldKind, flavor: DatabaseFlavor) -> &'static str {
    match (kind, flavor) {
        (FieldKind::Integer, DatabaseFlavor::Sqlite) => "INTEGER",
        (FieldKind::Integer, _) => "BIGINT",
        (FieldKind::Float, DatabaseFlavor::Sqlite) => "REAL",
        (FieldKind::Float, DatabaseFlavor::PostgreSql) => "DOUBLE PRECISION",
        (FieldKind::Float, _) => "DOUBLE",
        // SQLite has no boolean storage class
        (FieldKind::Boolean, DatabaseFlavor::Sqlite) => "INTEGER",
        (FieldKind::Boolean, _) => "BOOLEAN",
        (FieldKind::Binary, DatabaseFlavor::PostgreSql) => "BYTEA",
        (FieldKind::Binary, DatabaseFlavor::MySql) => "LONGBLOB",
        (FieldKind::Binary, _) => "BLOB",
        (FieldKind::Text, DatabaseFlavor::MySql) => "LONGTEXT",
        (FieldKind::Text | FieldKind::Timestamp | FieldKind::Date, _) => "TEXT",
    }
}
