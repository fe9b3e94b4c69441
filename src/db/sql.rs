//! SQL synthesis from entity metadata.
//!
//! Every statement lists columns explicitly, in field declaration order, and
//! numbers its placeholders in the same order as the parameter list. The
//! executor re-checks that the two agree before anything is sent to the
//! driver (see [`check_parameter_count`]).

use crate::config::TableNaming;
use crate::db::flavor::DatabaseFlavor;
use crate::error::{DbError, DbResult};
use crate::models::{Entity, EntityMeta, ID_FIELD, StatementDescriptor, Value, metadata};

/// Builds statement descriptors for one flavor and naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlBuilder {
    flavor: DatabaseFlavor,
    naming: TableNaming,
}

impl SqlBuilder {
    pub fn new(flavor: DatabaseFlavor, naming: TableNaming) -> Self {
        Self { flavor, naming }
    }

    pub fn flavor(&self) -> DatabaseFlavor {
        self.flavor
    }

    pub fn naming(&self) -> TableNaming {
        self.naming
    }

    /// Quoted table name for `meta`.
    pub fn table(&self, meta: &EntityMeta) -> String {
        self.flavor.quote_identifier(&meta.table_name(self.naming))
    }

    /// `INSERT INTO t (cols) VALUES (placeholders)`.
    ///
    /// A NULL `id` is left out so the database can assign it. On flavors that
    /// report generated keys through `RETURNING`, the statement returns `id`.
    pub fn insert_statement<T: Entity>(&self, entity: &T) -> DbResult<StatementDescriptor> {
        let meta = metadata::<T>()?;
        let mut columns = Vec::with_capacity(meta.fields().len());
        let mut params = Vec::with_capacity(meta.fields().len());

        for field in meta.fields() {
            let value = field_value(&meta, entity, field.name)?;
            if field.name == ID_FIELD && value.is_null() {
                continue;
            }
            columns.push(self.flavor.quote_identifier(field.name));
            params.push(value);
        }

        let mut sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.table(&meta))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table(&meta),
                columns.join(", "),
                self.placeholders(1, params.len())
            )
        };

        if self.flavor.returns_generated_keys() && meta.id_field().is_some() {
            sql.push_str(&format!(" RETURNING {}", self.flavor.quote_identifier(ID_FIELD)));
        }

        Ok(StatementDescriptor::new(sql, params))
    }

    /// `UPDATE t SET col = ?, ... WHERE id = ?`, with the id bound last.
    pub fn update_by_id_statement<T: Entity>(&self, entity: &T) -> DbResult<StatementDescriptor> {
        let meta = metadata::<T>()?;
        require_id(&meta)?;

        let id = field_value(&meta, entity, ID_FIELD)?;
        if id.is_null() {
            return Err(DbError::mapping(
                meta.type_name(),
                "cannot update by id: 'id' is NULL",
            ));
        }

        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for field in meta.non_id_fields() {
            params.push(field_value(&meta, entity, field.name)?);
            assignments.push(format!(
                "{} = {}",
                self.flavor.quote_identifier(field.name),
                self.flavor.placeholder(params.len())
            ));
        }

        if assignments.is_empty() {
            return Err(DbError::mapping(
                meta.type_name(),
                "cannot update by id: entity has no fields besides 'id'",
            ));
        }

        params.push(id);
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.table(&meta),
            assignments.join(", "),
            self.flavor.quote_identifier(ID_FIELD),
            self.flavor.placeholder(params.len())
        );
        Ok(StatementDescriptor::new(sql, params))
    }

    /// `DELETE FROM t WHERE id = ?`.
    pub fn delete_by_id_statement<T: Entity>(
        &self,
        id: impl Into<Value>,
    ) -> DbResult<StatementDescriptor> {
        let meta = metadata::<T>()?;
        require_id(&meta)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            self.table(&meta),
            self.flavor.quote_identifier(ID_FIELD),
            self.flavor.placeholder(1)
        );
        Ok(StatementDescriptor::new(sql, vec![id.into()]))
    }

    /// `SELECT cols FROM t WHERE id = ?`.
    pub fn select_by_id_statement<T: Entity>(
        &self,
        id: impl Into<Value>,
    ) -> DbResult<StatementDescriptor> {
        let meta = metadata::<T>()?;
        require_id(&meta)?;
        let sql = format!(
            "{} WHERE {} = {}",
            self.select_from(&meta),
            self.flavor.quote_identifier(ID_FIELD),
            self.flavor.placeholder(1)
        );
        Ok(StatementDescriptor::new(sql, vec![id.into()]))
    }

    /// `SELECT cols FROM t`.
    pub fn select_all_statement<T: Entity>(&self) -> DbResult<StatementDescriptor> {
        let meta = metadata::<T>()?;
        Ok(StatementDescriptor::raw(self.select_from(&meta)))
    }

    /// `CALL routine(?, ...)` for engines with stored procedures.
    pub fn call_statement(
        &self,
        routine: &str,
        params: Vec<Value>,
    ) -> DbResult<StatementDescriptor> {
        call_statement(self.flavor, routine, params)
    }

    fn select_from(&self, meta: &EntityMeta) -> String {
        let columns: Vec<String> = meta
            .fields()
            .iter()
            .map(|f| self.flavor.quote_identifier(f.name))
            .collect();
        format!("SELECT {} FROM {}", columns.join(", "), self.table(meta))
    }

    /// Comma-separated placeholders numbered `start..start + count`.
    fn placeholders(&self, start: usize, count: usize) -> String {
        (start..start + count)
            .map(|idx| self.flavor.placeholder(idx))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `CALL routine(?, ...)`; `routine` may be schema-qualified.
pub fn call_statement(
    flavor: DatabaseFlavor,
    routine: &str,
    params: Vec<Value>,
) -> DbResult<StatementDescriptor> {
    if !flavor.supports_procedures() {
        return Err(DbError::invalid_input(format!(
            "{} does not support stored procedures",
            flavor
        )));
    }

    let parts: Vec<&str> = routine.split('.').collect();
    if parts.iter().any(|p| !is_plain_identifier(p)) {
        return Err(DbError::invalid_input(format!(
            "Invalid routine name: '{}'",
            routine
        )));
    }
    let quoted: Vec<String> = parts.iter().map(|p| flavor.quote_identifier(p)).collect();
    let placeholders: Vec<String> = (1..=params.len()).map(|idx| flavor.placeholder(idx)).collect();

    let sql = format!("CALL {}({})", quoted.join("."), placeholders.join(", "));
    Ok(StatementDescriptor::new(sql, params))
}

fn require_id(meta: &EntityMeta) -> DbResult<()> {
    if meta.id_field().is_none() {
        return Err(DbError::mapping(
            meta.type_name(),
            "entity has no field named 'id'",
        ));
    }
    Ok(())
}

fn field_value<T: Entity>(meta: &EntityMeta, entity: &T, field: &str) -> DbResult<Value> {
    entity.field_value(field).ok_or_else(|| {
        DbError::mapping(
            meta.type_name(),
            format!("declared field '{}' has no accessor", field),
        )
    })
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Count the placeholders in `sql` for `flavor`.
///
/// Text inside quotes and comments is skipped; MySQL string literals also
/// honour backslash escapes. For `$n` placeholders the
/// highest index counts, since the same index may appear more than once.
pub fn count_placeholders(sql: &str, flavor: DatabaseFlavor) -> usize {
    let chars: Vec<char> = sql.chars().collect();
    let mut count = 0;
    let mut highest = 0;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            quote @ ('\'' | '"' | '`') => {
                let backslash_escapes = flavor == DatabaseFlavor::MySql && quote != '`';
                i += 1;
                while i < chars.len() {
                    if backslash_escapes && chars[i] == '\\' {
                        i += 2;
                        continue;
                    }
                    if chars[i] == quote {
                        // A doubled quote is an escaped quote, not the end.
                        if chars.get(i + 1) == Some(&quote) {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                    i += 1;
                }
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 1;
            }
            '?' if flavor != DatabaseFlavor::PostgreSql => count += 1,
            '$' if flavor == DatabaseFlavor::PostgreSql => {
                let digits: String = chars[i + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                if let Ok(n) = digits.parse::<usize>() {
                    highest = highest.max(n);
                    i += digits.len();
                }
            }
            _ => {}
        }
        i += 1;
    }

    if flavor == DatabaseFlavor::PostgreSql {
        highest
    } else {
        count
    }
}

/// Fail unless `stmt` has exactly one parameter per placeholder.
pub fn check_parameter_count(stmt: &StatementDescriptor, flavor: DatabaseFlavor) -> DbResult<()> {
    let placeholders = count_placeholders(stmt.sql(), flavor);
    if placeholders != stmt.params().len() {
        return Err(DbError::mapping(
            "statement",
            format!(
                "statement has {} placeholder(s) but {} parameter(s): {}",
                placeholders,
                stmt.params().len(),
                stmt.sql()
            ),
        ));
    }
    Ok(())
}
