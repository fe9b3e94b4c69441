//! Data models for the mapper.
//!
//! This module contains the plain data types shared by every layer:
//! values, entity metadata, statement descriptors and rows.

pub mod entity;
pub mod statement;
pub mod value;

pub use entity::{Entity, EntityMeta, FieldDescriptor, FieldKind, ID_FIELD, metadata};
pub use statement::{Row, StatementDescriptor};
pub use value::{FieldType, Value};
