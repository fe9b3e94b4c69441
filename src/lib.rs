//! db-mapper
//!
//! A small data-access layer that maps plain Rust structs onto relational
//! tables (SQLite, PostgreSQL, MySQL). Entities are declared with
//! [`entity!`], statements are synthesized from their field lists, rows are
//! mapped back strictly by column name, and batches run atomically.
//!
//! ```no_run
//! use db_mapper::{Repository, entity};
//!
//! entity! {
//!     #[derive(Debug, Clone, Default, PartialEq)]
//!     pub struct Person {
//!         pub id: Option<i64>,
//!         pub name: String,
//!         pub age: i64,
//!     }
//! }
//!
//! # fn main() -> db_mapper::DbResult<()> {
//! let repo = Repository::open("sqlite:people.db?mode=rwc")?;
//! repo.create_table::<Person>()?;
//! let id = repo.insert(&Person { id: None, name: "Ada".into(), age: 30 })?;
//! if let Some(id) = id {
//!     let ada: Option<Person> = repo.select_by_id(id)?;
//!     assert_eq!(ada.map(|p| p.age), Some(30));
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod repository;

pub use config::{DatabaseUrl, MapperConfig, TableNaming};
pub use db::{DatabaseFlavor, SqlxDriver};
pub use error::{CoercionError, DbError, DbResult, DriverError};
pub use models::{Entity, FieldType, Row, StatementDescriptor, Value};
pub use repository::{Repository, Transaction};
