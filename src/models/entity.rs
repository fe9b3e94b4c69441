//! Entity metadata.
//!
//! An entity is a plain struct whose fields map one-to-one onto table columns.
//! Types opt in by implementing [`Entity`], usually through the
//! [`entity!`](crate::entity) macro, which keeps fields in declaration order.
//!
//! [`metadata`] validates an entity type once and caches the result per type,
//! so every later statement built for that type sees the same field list.

use crate::config::TableNaming;
use crate::error::{CoercionError, DbError, DbResult};
use crate::models::value::Value;
use serde::Serialize;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock};

/// Name of the identity field used by the `*_by_id` operations.
pub const ID_FIELD: &str = "id";

/// Storage kind of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Timestamp,
    Date,
}

impl FieldKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// One persistable field of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub kind: FieldKind,
    /// True for `Option<_>` fields.
    pub nullable: bool,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, kind: FieldKind, nullable: bool) -> Self {
        Self {
            name,
            kind,
            nullable,
        }
    }
}

/// A data object persisted as one table row.
///
/// `Default` is the zero-argument constructor used when mapping rows back
/// into instances.
pub trait Entity: Default + Send + 'static {
    /// Rust type name, the base of the default table name.
    fn type_name() -> &'static str;

    /// Explicit table name, bypassing the naming convention.
    fn table_name() -> Option<&'static str> {
        None
    }

    /// Persistable fields in declaration order.
    fn fields() -> Vec<FieldDescriptor>;

    /// Current value of `field`, or `None` if the entity has no such field.
    fn field_value(&self, field: &str) -> Option<Value>;

    /// Convert `value` into the declared type of `field` and store it.
    fn set_field(&mut self, field: &str, value: Value) -> Result<(), CoercionError>;
}

/// Validated metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMeta {
    type_name: &'static str,
    table_override: Option<&'static str>,
    fields: Vec<FieldDescriptor>,
}

impl EntityMeta {
    /// Validate a field list.
    ///
    /// Field names must be plain identifiers and must stay distinct when
    /// compared case-insensitively, since most databases fold identifier case.
    pub fn new(
        type_name: &'static str,
        table_override: Option<&'static str>,
        fields: Vec<FieldDescriptor>,
    ) -> DbResult<Self> {
        if fields.is_empty() {
            return Err(DbError::mapping(type_name, "entity has no persistable fields"));
        }

        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if !is_identifier(field.name) {
                return Err(DbError::mapping(
                    type_name,
                    format!("field '{}' is not a valid column name", field.name),
                ));
            }
            if !seen.insert(field.name.to_ascii_lowercase()) {
                return Err(DbError::mapping(
                    type_name,
                    format!("field '{}' resolves to more than one column", field.name),
                ));
            }
        }

        if let Some(table) = table_override {
            if !is_identifier(table) {
                return Err(DbError::mapping(
                    type_name,
                    format!("table name '{}' is not a valid identifier", table),
                ));
            }
        }

        Ok(Self {
            type_name,
            table_override,
            fields,
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The field literally named `id`, if declared.
    pub fn id_field(&self) -> Option<&FieldDescriptor> {
        self.field(ID_FIELD)
    }

    /// Fields other than `id`, in declaration order.
    pub fn non_id_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.name != ID_FIELD)
    }

    /// Table name under `naming`, unless the entity declares one explicitly.
    pub fn table_name(&self, naming: TableNaming) -> String {
        match self.table_override {
            Some(table) => table.to_string(),
            None => naming.apply(self.type_name),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

type MetaCache = RwLock<HashMap<TypeId, Arc<EntityMeta>>>;

fn cache() -> &'static MetaCache {
    static CACHE: OnceLock<MetaCache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Validated metadata for `T`, computed on first use and shared afterwards.
pub fn metadata<T: Entity>() -> DbResult<Arc<EntityMeta>> {
    let key = TypeId::of::<T>();

    if let Some(meta) = cache()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(&key)
    {
        return Ok(Arc::clone(meta));
    }

    let meta = Arc::new(EntityMeta::new(
        T::type_name(),
        T::table_name(),
        T::fields(),
    )?);

    let mut entries = cache()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    // Another thread may have filled the slot meanwhile; keep the first entry.
    Ok(Arc::clone(entries.entry(key).or_insert(meta)))
}
