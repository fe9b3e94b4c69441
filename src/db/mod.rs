//! Database access layer.
//!
//! This module provides:
//! - The blocking driver seam and its sqlx-backed implementation
//! - Flavor detection and dialect details
//! - SQL synthesis, row mapping and statement execution
//! - Transaction boundaries and atomic batches
//! - DDL export and the `entity!` declaration macro

pub mod driver;
pub mod executor;
pub mod flavor;
#[macro_use]
pub mod macros;
pub(crate) mod params;
pub mod row_mapper;
pub mod schema;
pub mod sql;
pub mod sqlx_driver;
pub mod transaction;
pub mod types;

pub use driver::{Connection, ConnectionFactory, ConnectionGuard, Cursor, DriverResult, Statement};
pub use executor::QueryExecutor;
pub use flavor::{DatabaseFlavor, detect_database_flavor};
pub use row_mapper::{map_row, map_rows};
pub use schema::create_table_statement;
pub use sql::{SqlBuilder, check_parameter_count, count_placeholders};
pub use sqlx_driver::SqlxDriver;
pub use transaction::{TransactionBoundary, TransactionState, run_batch, with_transaction};
