//! Typed, tree-shaped generic values.
//!
//! [`Value`] is the lingua franca of the management kernel: operation
//! parameters, operation results, resource attribute values and resource
//! descriptions are all value trees. Objects preserve insertion order, so
//! rendering the same tree twice produces byte-for-byte identical output.
//! Equality is structural (tag plus payload), never identity; code that
//! needs a distinguished marker value builds one and compares it with `==`.

use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// A generic, tree-shaped value: scalar, list, or insertion-ordered object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// No value. Reading an unset key yields `Undefined`.
    #[default]
    Undefined,
    /// A boolean scalar.
    Boolean(bool),
    /// A signed integer scalar.
    Long(i64),
    /// A string scalar.
    Str(String),
    /// An ordered list.
    List(Vec<Value>),
    /// An insertion-ordered map of field name to value.
    Object(Vec<(String, Value)>),
}

impl Value {
    /// Creates an empty object.
    #[must_use]
    pub const fn object() -> Self {
        Self::Object(Vec::new())
    }

    /// Creates an empty list.
    #[must_use]
    pub const fn list() -> Self {
        Self::List(Vec::new())
    }

    /// Returns true unless this value is `Undefined`.
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        !matches!(self, Self::Undefined)
    }

    /// Returns true if this is an object containing `key`, defined or not.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        match self {
            Self::Object(fields) => fields.iter().any(|(k, _)| k == key),
            _ => false,
        }
    }

    /// Returns true if this is an object containing `key` with a defined
    /// value.
    #[must_use]
    pub fn has_defined(&self, key: &str) -> bool {
        self.get(key).is_some_and(Value::is_defined)
    }

    /// Returns the field `key` of an object, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Returns the field `key` of an object, or `Undefined` if absent.
    #[must_use]
    pub fn field(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&Value::Undefined)
    }

    /// Follows a path of object keys, returning `Undefined` at the first
    /// missing or non-object level.
    #[must_use]
    pub fn field_path(&self, path: &[&str]) -> &Value {
        let mut current = self;
        for key in path {
            current = current.field(key);
        }
        current
    }

    /// Returns a mutable reference to the field `key`, creating it (and
    /// converting `self` into an object if it was undefined) on demand.
    ///
    /// New fields start out `Undefined` and are appended, preserving
    /// insertion order.
    pub fn get_or_insert(&mut self, key: &str) -> &mut Value {
        if !matches!(self, Self::Object(_)) {
            // Scalar/list values are replaced rather than silently merged.
            *self = Self::object();
        }
        let Self::Object(fields) = self else {
            unreachable!("value was just made an object")
        };
        let index = match fields.iter().position(|(k, _)| k == key) {
            Some(index) => index,
            None => {
                fields.push((key.to_string(), Value::Undefined));
                fields.len() - 1
            }
        };
        &mut fields[index].1
    }

    /// Sets the field `key` to `value`, converting `self` into an object if
    /// needed. Existing fields are overwritten in place, keeping their
    /// original position.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        *self.get_or_insert(key) = value.into();
        self
    }

    /// Removes and returns the field `key` of an object.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match self {
            Self::Object(fields) => {
                let index = fields.iter().position(|(k, _)| k == key)?;
                Some(fields.remove(index).1)
            }
            _ => None,
        }
    }

    /// Appends `value` to a list, converting `self` into a list if it was
    /// undefined.
    pub fn push(&mut self, value: impl Into<Value>) -> &mut Self {
        if matches!(self, Self::Undefined) {
            *self = Self::list();
        }
        if let Self::List(items) = self {
            items.push(value.into());
        }
        self
    }

    /// Returns the object entries in insertion order, or an empty slice.
    #[must_use]
    pub fn entries(&self) -> &[(String, Value)] {
        match self {
            Self::Object(fields) => fields,
            _ => &[],
        }
    }

    /// Returns the object field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries().iter().map(|(k, _)| k.as_str())
    }

    /// Returns the list items, or an empty slice.
    #[must_use]
    pub fn items(&self) -> &[Value] {
        match self {
            Self::List(items) => items,
            _ => &[],
        }
    }

    /// Returns the boolean payload, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an integer.
    #[must_use]
    pub const fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Renders this value as canonical JSON.
    ///
    /// Objects are rendered in insertion order and `Undefined` renders as
    /// `null`, so two structurally equal trees always produce identical
    /// bytes.
    #[must_use]
    pub fn to_json(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Long(n) => write!(f, "{n}"),
            Self::Str(s) => write_json_string(f, s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(fields) => {
                f.write_str("{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write_json_string(f, key)?;
                    f.write_str(":")?;
                    write!(f, "{value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn write_json_string(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if (c as u32) < 0x20 => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

// Hand-written so object fields serialize in insertion order; a derived
// implementation would require a map type and lose the ordering guarantee.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Undefined => serializer.serialize_none(),
            Self::Boolean(b) => serializer.serialize_bool(*b),
            Self::Long(n) => serializer.serialize_i64(*n),
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, value) in fields {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Long(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}
