//! The closed value type shared by `vars`, `params`, and template bindings.
//!
//! Both `vars` entries and template `params` entries arrive from the
//! document as either a single string or an array of strings. Representing
//! that as `serde_json::Value` or similar would let a float or a table slip
//! through; instead we use a two-armed sum type so every consumer matches
//! exhaustively instead of probing an open type.

use std::fmt;

/// A configuration value: either a single string or an array of strings.
///
/// This is the only value shape the document format allows for `vars` and
/// template `params`. Anything else (a table, a number, a boolean) is a
/// schema error at the point it is extracted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// A plain string value.
    String(String),
    /// An ordered array of strings.
    Array(Vec<String>),
}

impl Value {
    /// The type name used in error messages (`"string"` or `"array"`).
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Array(_) => "array",
        }
    }

    /// Borrow as a string, if this is a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Array(_) => None,
        }
    }

    /// Borrow as a string slice, if this is an `Array` value.
    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            Value::Array(items) => Some(items),
            Value::String(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Array(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::Array(items)
    }
}
