//! Typed values and key/value entries
//!
//! `TypedValue` is the value domain handed to condition evaluators. Raw
//! stored or posted values (JSON) are converted once, at the edge.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Tagged value - exactly one variant is populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypedValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Json(Value),
}

impl TypedValue {
    /// Convert a raw JSON value
    ///
    /// Returns `None` for `null`, which callers treat as "no value".
    /// Integral numbers become `Long`, other numbers `Double`; arrays and
    /// objects are kept as `Json`.
    pub fn from_json(raw: &Value) -> Option<Self> {
        match raw {
            Value::Null => None,
            Value::Bool(b) => Some(TypedValue::Boolean(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(TypedValue::Long(i))
                } else {
                    n.as_f64().map(TypedValue::Double)
                }
            },
            Value::String(s) => Some(TypedValue::String(s.clone())),
            Value::Array(_) | Value::Object(_) => Some(TypedValue::Json(raw.clone())),
        }
    }

    /// Numeric view (booleans map to 0/1, numeric strings are parsed)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Long(v) => Some(*v as f64),
            TypedValue::Double(v) => Some(*v),
            TypedValue::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            TypedValue::String(s) => s.trim().parse().ok(),
            TypedValue::Json(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TypedValue::Boolean(v) => Some(*v),
            TypedValue::Long(v) => Some(*v != 0),
            TypedValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TypedValue::String(_) => "STRING",
            TypedValue::Long(_) => "LONG",
            TypedValue::Double(_) => "DOUBLE",
            TypedValue::Boolean(_) => "BOOLEAN",
            TypedValue::Json(_) => "JSON",
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::String(v) => f.write_str(v),
            TypedValue::Long(v) => write!(f, "{}", v),
            TypedValue::Double(v) => write!(f, "{}", v),
            TypedValue::Boolean(v) => write!(f, "{}", v),
            TypedValue::Json(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self {
        TypedValue::Double(v)
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        TypedValue::Long(v)
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self {
        TypedValue::Boolean(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        TypedValue::String(v.to_string())
    }
}

// ============================================================================
// Stored entries
// ============================================================================

/// Latest time-series entry as returned by the time-series store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TsKvEntry {
    pub key: String,
    pub ts: i64,
    /// `None` when the stored value is absent/null
    pub value: Option<TypedValue>,
}

impl TsKvEntry {
    pub fn new(key: impl Into<String>, ts: i64, value: impl Into<TypedValue>) -> Self {
        Self {
            key: key.into(),
            ts,
            value: Some(value.into()),
        }
    }
}

/// Attribute entry as returned by the attribute store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeKvEntry {
    pub key: String,
    pub last_update_ts: i64,
    /// `None` when the stored value is absent/null
    pub value: Option<TypedValue>,
}

impl AttributeKvEntry {
    pub fn new(key: impl Into<String>, last_update_ts: i64, value: impl Into<TypedValue>) -> Self {
        Self {
            key: key.into(),
            last_update_ts,
            value: Some(value.into()),
        }
    }
}
