//! Runtime value types shared between the query boundary and the compiler.

use serde::{Deserialize, Serialize};

use crate::schema::FieldType;

/// A runtime value appearing in filters, presets, and fetched rows.
///
/// This enum covers everything the query boundary can hand the compiler.
/// `Undefined` is distinct from `Null`: it marks a dynamic variable the
/// upstream parser failed to resolve. It never matches anything and is
/// dropped when bind lists are built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Unresolved dynamic variable; serialized as null, dropped from binds.
    Undefined,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Array of values.
    Array(Vec<Value>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is the unresolved-variable placeholder.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get as string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as array slice.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Coerce this value to the given field's numeric representation.
    ///
    /// Returns `None` when the target type is not numeric, when the value
    /// is `Undefined`, or when a string does not parse. Non-numeric target
    /// types leave values untouched at the call sites, so `None` means
    /// "no coercion applies", not an error.
    pub fn coerce_numeric(&self, field_type: &FieldType) -> Option<Value> {
        if !field_type.is_numeric() {
            return None;
        }

        match self {
            Value::Integer(_) | Value::Float(_) => Some(self.clone()),
            Value::String(s) => {
                if field_type.is_integer() {
                    s.trim().parse::<i64>().ok().map(Value::Integer)
                } else {
                    s.trim().parse::<f64>().ok().map(Value::Float)
                }
            }
            Value::Bool(b) => Some(Value::Integer(i64::from(*b))),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            // Objects have no scalar counterpart; the raw JSON text is
            // what filters compare against.
            other @ serde_json::Value::Object(_) => Value::String(other.to_string()),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null | Value::Undefined => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
