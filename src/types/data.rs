//! Typed payloads carried by associations.

use std::fmt;
use serde::{Deserialize, Serialize};

/// Discriminant of a [`Data`] payload, used in error messages and handler checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// UTF-8 text
    String,
    /// 64-bit float
    Number,
    /// Function source text
    Function,
    /// Ordered list of items (local only, never projected to the wire)
    Array,
}

impl DataKind {
    /// Lowercase name as used in messages
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::String => "string",
            DataKind::Number => "number",
            DataKind::Function => "function",
            DataKind::Array => "array",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload stored on an association.
///
/// Exactly one kind per association; which kinds are accepted is decided by the
/// data handler registered for the association's type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Data {
    /// UTF-8 text
    String(String),
    /// 64-bit float
    Number(f64),
    /// Function source text
    Function(String),
    /// Ordered list of items
    Array(Vec<Data>),
}

impl Data {
    /// Kind of this payload
    pub fn kind(&self) -> DataKind {
        match self {
            Data::String(_) => DataKind::String,
            Data::Number(_) => DataKind::Number,
            Data::Function(_) => DataKind::Function,
            Data::Array(_) => DataKind::Array,
        }
    }

    /// Text of a string payload
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    /// Value of a number payload
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Data::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Items of an array payload
    pub fn as_array(&self) -> Option<&[Data]> {
        match self {
            Data::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// Numbers compare by value, except that NaN equals NaN: a payload always
/// equals itself, so reapplying it is not a change.
impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Data::String(a), Data::String(b)) | (Data::Function(a), Data::Function(b)) => a == b,
            (Data::Number(a), Data::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Data::Array(a), Data::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Data::String(value.to_string())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Data::String(value)
    }
}

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Data::Number(value)
    }
}

impl From<i64> for Data {
    fn from(value: i64) -> Self {
        Data::Number(value as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_payload_equals_itself() {
        assert_eq!(Data::Number(f64::NAN), Data::Number(f64::NAN));
        assert_eq!(Data::Array(vec![Data::Number(f64::NAN)]), Data::Array(vec![Data::Number(f64::NAN)]));
        assert_ne!(Data::Number(f64::NAN), Data::Number(0.0));
        assert_eq!(Data::Number(0.0), Data::Number(-0.0));
    }

    #[test]
    fn kinds_never_compare_equal() {
        assert_ne!(Data::from("f"), Data::Function("f".to_string()));
    }
}
