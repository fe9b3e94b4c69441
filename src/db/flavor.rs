//! Database flavor detection and the dialect details that depend on it.
//!
//! The mapper only cares about a handful of differences between engines:
//! placeholder syntax, identifier quoting, and how an INSERT reports its
//! generated key.

use crate::db::driver::Connection;
use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Supported database flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseFlavor {
    /// Includes MariaDB
    MySql,
    PostgreSql,
    Sqlite,
    /// Anything else; uses ANSI quoting and `?` placeholders
    #[default]
    Unknown,
}

impl DatabaseFlavor {
    /// Parse database flavor from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Self {
        let lower = connection_string.trim().to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Self::PostgreSql
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Self::MySql
        } else if lower.starts_with("sqlite:") {
            Self::Sqlite
        } else {
            Self::Unknown
        }
    }

    /// Classify a driver-reported product name such as "PostgreSQL" or
    /// "MariaDB".
    pub fn from_product_name(product: &str) -> Self {
        let lower = product.to_lowercase();
        if lower.contains("postgres") {
            Self::PostgreSql
        } else if lower.contains("mysql") || lower.contains("mariadb") {
            Self::MySql
        } else if lower.contains("sqlite") {
            Self::Sqlite
        } else {
            Self::Unknown
        }
    }

    /// Get the display name for this flavor.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSql => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::Sqlite => "SQLite",
            Self::Unknown => "unknown",
        }
    }

    /// Placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::PostgreSql => format!("${}", index),
            _ => "?".to_string(),
        }
    }

    /// Quote an identifier, doubling any embedded quote character.
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// True when generated keys come back through `RETURNING` instead of
    /// the driver's last-insert-id.
    ///
    /// SQLite has `RETURNING` since 3.35; sqlx's `Any` driver never reports
    /// its last insert rowid.
    pub fn returns_generated_keys(&self) -> bool {
        matches!(self, Self::PostgreSql | Self::Sqlite)
    }

    /// True when the engine has stored procedures callable with `CALL`.
    pub fn supports_procedures(&self) -> bool {
        matches!(self, Self::MySql | Self::PostgreSql)
    }
}

impl std::fmt::Display for DatabaseFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Ask an open connection which engine it talks to.
pub fn detect_database_flavor(conn: &mut dyn Connection) -> DbResult<DatabaseFlavor> {
    let product = conn
        .product_name()
        .map_err(|e| DbError::execution("flavor detection", e))?;
    let flavor = DatabaseFlavor::from_product_name(&product);
    debug!(product = %product, flavor = %flavor, "Detected database flavor");
    Ok(flavor)
}
