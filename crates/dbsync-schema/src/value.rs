//! Typed values for seed records and catalog rows.

use std::fmt;

/// A runtime SQL value.
///
/// Seed records store these per column, and rows coming back from the
/// execution layer carry them as well.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL
    Null,

    /// Boolean (BIT)
    Boolean(bool),

    /// Whole number (TINYINT through BIGINT)
    Integer(i64),

    /// Floating point or decimal number
    Float(f64),

    /// Text (VARCHAR, NVARCHAR, etc.)
    Text(String),
}

impl Value {
    /// Short tag naming the variant, as written into descriptors.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
        }
    }

    /// Parse a raw string according to a type tag.
    ///
    /// Returns `None` for an unknown tag or a value that does not fit it.
    pub fn from_tagged(tag: &str, raw: &str) -> Option<Value> {
        match tag {
            "null" => Some(Value::Null),
            "bool" => parse_bool(raw).map(Value::Boolean),
            "int" => raw.trim().parse().ok().map(Value::Integer),
            "float" => raw.trim().parse().ok().map(Value::Float),
            "text" => Some(Value::Text(raw.to_string())),
            _ => None,
        }
    }
}

/// Parse `true`/`false`/`1`/`0`, ignoring case and surrounding whitespace.
pub fn parse_bool(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("true") || raw == "1" {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") || raw == "0" {
        Some(false)
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
