//! Dynamic wire values
//!
//! Frame bodies that are described by a runtime schema rather than a
//! compile-time type are carried as a [`Value`]. The enum is self-describing
//! on the wire: postcard encodes the variant discriminant and all lengths,
//! so a peer can decode a `Value` without knowing the schema that produced
//! it. Object properties keep their insertion order, which keeps encoded
//! frames byte-stable for a given schema.

use serde::{Deserialize, Serialize};

/// A dynamically typed value, as carried inside schema-described bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// The absent/null value
    Null,
    /// A boolean
    Bool(bool),
    /// A signed integer
    Int(i64),
    /// A floating point number
    Float(f64),
    /// A UTF-8 string
    Str(String),
    /// A raw byte string
    Bytes(Vec<u8>),
    /// An ordered sequence of values
    Array(Vec<Value>),
    /// An ordered set of named properties
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Build an object value from name/value pairs
    pub fn object<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Look up a property of an object value.
    ///
    /// Returns `None` for non-objects and missing properties alike.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(props) => props.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// The string payload of a `Str` value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload of an `Int` value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// A short name for the value's runtime type, used in failure messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Whether this is the null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
