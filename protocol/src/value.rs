use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A decoded argument value.
///
/// Integer wire types all decode into `Int`; `UInt` only appears for JSON
/// input that does not fit an `i64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<ArgValue>),
    Object(BTreeMap<String, ArgValue>),
}

pub type ArgumentValues = Vec<ArgValue>;

impl ArgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Int(v) => Some(*v as f64),
            ArgValue::UInt(v) => Some(*v as f64),
            ArgValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integral view of a numeric value. Floats are accepted only when they
    /// carry no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            ArgValue::UInt(v) => i64::try_from(*v).ok(),
            ArgValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[ArgValue]> {
        match self {
            ArgValue::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        match self {
            ArgValue::Object(map) => map.get(key),
            ArgValue::Array(values) => key.parse::<usize>().ok().and_then(|i| values.get(i)),
            _ => None,
        }
    }

    pub fn index(&self, index: usize) -> Option<&ArgValue> {
        match self {
            ArgValue::Array(values) => values.get(index),
            ArgValue::Object(map) => map.get(&index.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Null => write!(f, "null"),
            ArgValue::Bool(v) => write!(f, "{v}"),
            ArgValue::Int(v) => write!(f, "{v}"),
            ArgValue::UInt(v) => write!(f, "{v}"),
            ArgValue::Float(v) => write!(f, "{v}"),
            ArgValue::String(s) => write!(f, "{s}"),
            ArgValue::Array(values) => {
                write!(f, "[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            ArgValue::Object(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<u32> for ArgValue {
    fn from(v: u32) -> Self {
        ArgValue::Int(v as i64)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::String(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::String(v)
    }
}
