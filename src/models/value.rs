//! Scalar values exchanged with the driver.
//!
//! `Value` is what gets bound to placeholders and what comes back in rows.
//! `FieldType` converts between `Value` and the Rust types entities declare.

use crate::error::CoercionError;
use crate::models::entity::FieldKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

/// Textual timestamp layouts accepted when coercing text into date/time fields.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Layout used when a timestamp is bound as text.
pub const TIMESTAMP_TEXT_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A raw database value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    /// Binary data (base64 encoded when serialized)
    #[serde(serialize_with = "base64_bytes::serialize")]
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Short description used in coercion errors.
    fn describe(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Text(s) if s.chars().count() > 32 => {
                format!("text '{}...'", s.chars().take(32).collect::<String>())
            }
            Self::Text(s) => format!("text '{}'", s),
            Self::Bytes(b) => format!("{} bytes", b.len()),
            Self::Bool(v) => format!("bool {}", v),
            Self::Int(v) => format!("int {}", v),
            Self::Float(v) => format!("float {}", v),
            Self::Timestamp(v) => format!("timestamp {}", v),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

impl_value_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f32 => Float,
    f64 => Float,
    String => Text,
    Vec<u8> => Bytes,
    NaiveDateTime => Timestamp,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A Rust type that can be stored in an entity field.
pub trait FieldType: Sized {
    const KIND: FieldKind;
    const NULLABLE: bool = false;

    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, CoercionError>;
}

fn mismatch<T>(expected: &'static str, value: &Value) -> Result<T, CoercionError> {
    Err(CoercionError::new(expected, value.describe()))
}

impl FieldType for i64 {
    const KIND: FieldKind = FieldKind::Integer;

    fn to_value(&self) -> Value {
        Value::Int(*self)
    }

    fn from_value(value: Value) -> Result<Self, CoercionError> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Bool(v) => Ok(v as i64),
            Value::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(v as i64),
            Value::Text(ref s) => s.trim().parse().or_else(|_| mismatch("integer", &value)),
            ref other => mismatch("integer", other),
        }
    }
}

impl FieldType for i32 {
    const KIND: FieldKind = FieldKind::Integer;

    fn to_value(&self) -> Value {
        Value::Int(*self as i64)
    }

    fn from_value(value: Value) -> Result<Self, CoercionError> {
        let described = value.describe();
        let wide =
            i64::from_value(value).map_err(|e| CoercionError::new("32-bit integer", e.found))?;
        i32::try_from(wide).map_err(|_| CoercionError::new("32-bit integer", described))
    }
}

impl FieldType for f64 {
    const KIND: FieldKind = FieldKind::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, CoercionError> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            Value::Text(ref s) => s.trim().parse().or_else(|_| mismatch("float", &value)),
            ref other => mismatch("float", other),
        }
    }
}

impl FieldType for f32 {
    const KIND: FieldKind = FieldKind::Float;

    fn to_value(&self) -> Value {
        Value::Float(*self as f64)
    }

    fn from_value(value: Value) -> Result<Self, CoercionError> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FieldType for bool {
    const KIND: FieldKind = FieldKind::Boolean;

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, CoercionError> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::Text(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => mismatch("boolean", &value),
            },
            ref other => mismatch("boolean", other),
        }
    }
}

impl FieldType for String {
    const KIND: FieldKind = FieldKind::Text;

    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, CoercionError> {
        match value {
            Value::Text(v) => Ok(v),
            Value::Int(v) => Ok(v.to_string()),
            Value::Float(v) => Ok(v.to_string()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::Timestamp(v) => Ok(v.format(TIMESTAMP_TEXT_FORMAT).to_string()),
            Value::Bytes(v) => String::from_utf8(v).map_err(|e| {
                CoercionError::new("text", format!("{} non-UTF-8 bytes", e.as_bytes().len()))
            }),
            Value::Null => mismatch("text", &Value::Null),
        }
    }
}

impl FieldType for Vec<u8> {
    const KIND: FieldKind = FieldKind::Binary;

    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, CoercionError> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Text(v) => Ok(v.into_bytes()),
            ref other => mismatch("binary", other),
        }
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl FieldType for NaiveDateTime {
    const KIND: FieldKind = FieldKind::Timestamp;

    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    /// Integers are read as seconds since the Unix epoch.
    fn from_value(value: Value) -> Result<Self, CoercionError> {
        match value {
            Value::Timestamp(v) => Ok(v),
            Value::Int(secs) => DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or_else(|| CoercionError::new("timestamp", value.describe())),
            Value::Text(ref s) => {
                parse_timestamp(s).ok_or_else(|| CoercionError::new("timestamp", value.describe()))
            }
            ref other => mismatch("timestamp", other),
        }
    }
}

impl FieldType for DateTime<Utc> {
    const KIND: FieldKind = FieldKind::Timestamp;

    fn to_value(&self) -> Value {
        Value::Timestamp(self.naive_utc())
    }

    fn from_value(value: Value) -> Result<Self, CoercionError> {
        NaiveDateTime::from_value(value).map(|naive| naive.and_utc())
    }
}

impl FieldType for NaiveDate {
    const KIND: FieldKind = FieldKind::Date;

    fn to_value(&self) -> Value {
        Value::Text(self.format("%Y-%m-%d").to_string())
    }

    fn from_value(value: Value) -> Result<Self, CoercionError> {
        match value {
            Value::Text(ref s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .ok()
                .or_else(|| parse_timestamp(s).map(|ts| ts.date()))
                .ok_or_else(|| CoercionError::new("date", value.describe())),
            other => NaiveDateTime::from_value(other)
                .map(|ts| ts.date())
                .map_err(|e| CoercionError::new("date", e.found)),
        }
    }
}

impl<T: FieldType> FieldType for Option<T> {
    const KIND: FieldKind = T::KIND;
    const NULLABLE: bool = true;

    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, CoercionError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
