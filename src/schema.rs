//! Runtime schemas for action parameters and results
//!
//! Controllers declare their actions with [`Descriptor`]s: a name, a
//! [`TypeKind`], and an optionality flag. The dispatcher derives per-action
//! [`ObjectSchema`]s from those declarations and compiles them into an
//! [`ArgsDecoder`] and an [`ArgsValidator`]. Compilation walks the schema
//! once; the per-call hot path only walks the precomputed field plan.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// The declared type of a parameter or return value.
///
/// The wrapper kinds (`Future`, `Stream`, `Collection`) only appear in
/// return declarations. They carry their element type, and are unwrapped a
/// single level when the action's schemas are derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeKind {
    /// Any value is accepted
    Any,
    /// A boolean
    Bool,
    /// A signed integer
    Int,
    /// A floating point number
    Float,
    /// A UTF-8 string
    Str,
    /// A raw byte string
    Bytes,
    /// A homogeneous sequence
    Array(Box<TypeKind>),
    /// An object with free-form properties
    Object,
    /// An asynchronous single value
    Future(Option<Box<TypeKind>>),
    /// A push source delivering values over time
    Stream(Option<Box<TypeKind>>),
    /// A live, incrementally updated collection
    Collection(Option<Box<TypeKind>>),
}

impl TypeKind {
    /// If this is a wrapper kind, its name and declared element type
    pub fn wrapper(&self) -> Option<(&'static str, Option<&TypeKind>)> {
        match self {
            TypeKind::Future(el) => Some(("future", el.as_deref())),
            TypeKind::Stream(el) => Some(("stream", el.as_deref())),
            TypeKind::Collection(el) => Some(("collection", el.as_deref())),
            _ => None,
        }
    }

    /// Whether a native value conforms to this type
    pub fn admits(&self, v: &Value) -> bool {
        match self {
            TypeKind::Any => true,
            TypeKind::Bool => matches!(v, Value::Bool(_)),
            TypeKind::Int => matches!(v, Value::Int(_)),
            TypeKind::Float => matches!(v, Value::Float(_)),
            TypeKind::Str => matches!(v, Value::Str(_)),
            TypeKind::Bytes => matches!(v, Value::Bytes(_)),
            TypeKind::Array(el) => match v {
                Value::Array(items) => items.iter().all(|i| el.admits(i)),
                _ => false,
            },
            TypeKind::Object => matches!(v, Value::Object(_)),
            // Wrappers are declaration-only and admit no wire value
            TypeKind::Future(_) | TypeKind::Stream(_) | TypeKind::Collection(_) => false,
        }
    }
}

impl core::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TypeKind::Any => f.write_str("any"),
            TypeKind::Bool => f.write_str("bool"),
            TypeKind::Int => f.write_str("int"),
            TypeKind::Float => f.write_str("float"),
            TypeKind::Str => f.write_str("string"),
            TypeKind::Bytes => f.write_str("bytes"),
            TypeKind::Array(el) => write!(f, "array<{el}>"),
            TypeKind::Object => f.write_str("object"),
            TypeKind::Future(el) => wrapper_fmt(f, "future", el.as_deref()),
            TypeKind::Stream(el) => wrapper_fmt(f, "stream", el.as_deref()),
            TypeKind::Collection(el) => wrapper_fmt(f, "collection", el.as_deref()),
        }
    }
}

fn wrapper_fmt(
    f: &mut core::fmt::Formatter<'_>,
    name: &str,
    el: Option<&TypeKind>,
) -> core::fmt::Result {
    match el {
        Some(el) => write!(f, "{name}<{el}>"),
        None => f.write_str(name),
    }
}

/// A named, typed property declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// The property name
    pub name: String,
    /// The declared type
    pub kind: TypeKind,
    /// Whether the property may be absent or null
    pub optional: bool,
}

impl Descriptor {
    /// A required property declaration
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
        }
    }

    /// An optional property declaration
    pub fn optional(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
        }
    }

    /// A copy of this descriptor under a different name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: self.kind.clone(),
            optional: self.optional,
        }
    }
}

/// An ordered set of property declarations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSchema {
    properties: Vec<Descriptor>,
}

impl ObjectSchema {
    /// An empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a property. Declaration order is preserved.
    pub fn register(&mut self, desc: Descriptor) {
        self.properties.push(desc);
    }

    /// The registered properties, in declaration order
    pub fn properties(&self) -> &[Descriptor] {
        &self.properties
    }

    /// Look up a property by name
    pub fn get(&self, name: &str) -> Option<&Descriptor> {
        self.properties.iter().find(|d| d.name == name)
    }
}

/// One rejected value, addressed by the property path that failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    /// Path of the failing property
    pub path: String,
    /// Stable failure code, e.g. `type` or `required`
    pub code: String,
    /// Human readable description
    pub message: String,
}

impl ValidationFailure {
    fn new(path: &str, code: &str, message: String) -> Self {
        Self {
            path: path.to_string(),
            code: code.to_string(),
            message,
        }
    }
}

impl core::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}({}): {}", self.path, self.code, self.message)
    }
}

#[derive(Debug, Clone)]
struct FieldPlan {
    name: String,
    kind: TypeKind,
    optional: bool,
}

/// Compiled wire-to-native converter for an argument schema.
///
/// Decoding pulls each declared property out of the wire object in
/// declaration order and normalizes it (lossless integer/float coercion).
/// It never rejects; rejection is the validator's job, so a call with bad
/// arguments fails validation instead of failing mid-decode.
#[derive(Debug, Clone)]
pub struct ArgsDecoder {
    fields: Vec<FieldPlan>,
}

impl ArgsDecoder {
    /// Compile a decoder from an argument schema
    pub fn compile(schema: &ObjectSchema) -> Self {
        let fields = schema
            .properties()
            .iter()
            .map(|d| FieldPlan {
                name: d.name.clone(),
                kind: d.kind.clone(),
                optional: d.optional,
            })
            .collect();
        Self { fields }
    }

    /// Convert a wire object into the positional native argument tuple
    pub fn decode(&self, wire: &Value) -> Vec<Value> {
        self.fields
            .iter()
            .map(|f| match wire.get(&f.name) {
                Some(v) => normalize(&f.kind, v),
                None => Value::Null,
            })
            .collect()
    }
}

fn normalize(kind: &TypeKind, v: &Value) -> Value {
    match (kind, v) {
        (TypeKind::Float, Value::Int(i)) => Value::Float(*i as f64),
        (TypeKind::Int, Value::Float(f)) if f.fract() == 0.0 => Value::Int(*f as i64),
        (TypeKind::Array(el), Value::Array(items)) => {
            Value::Array(items.iter().map(|i| normalize(el, i)).collect())
        }
        _ => v.clone(),
    }
}

/// Compiled validator for a native argument tuple
#[derive(Debug, Clone)]
pub struct ArgsValidator {
    fields: Vec<FieldPlan>,
}

impl ArgsValidator {
    /// Compile a validator from an argument schema
    pub fn compile(schema: &ObjectSchema) -> Self {
        Self {
            fields: ArgsDecoder::compile(schema).fields,
        }
    }

    /// Check a positional argument tuple against the declarations.
    ///
    /// An empty result means the tuple is acceptable.
    pub fn validate(&self, args: &[Value]) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        for (idx, field) in self.fields.iter().enumerate() {
            let value = args.get(idx).unwrap_or(&Value::Null);
            if value.is_null() {
                if !field.optional {
                    failures.push(ValidationFailure::new(
                        &field.name,
                        "required",
                        format!("required argument '{}' is missing", field.name),
                    ));
                }
                continue;
            }
            if !field.kind.admits(value) {
                failures.push(ValidationFailure::new(
                    &field.name,
                    "type",
                    format!("expected {}, got {}", field.kind, value.type_name()),
                ));
            }
        }
        failures
    }
}
