//! Association identifiers.
//!
//! Ids are opaque strings on the wire (`_id`, `_type`, ...). Inside the graph they
//! are interned as `Arc<str>` so that the four relation indices can hold many
//! copies of the same id for the cost of a pointer.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Stable, globally unique identifier of an association.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssocId(Arc<str>);

impl AssocId {
    /// Create an id from any string-like value
    pub fn new(id: impl AsRef<str>) -> Self {
        AssocId(Arc::from(id.as_ref()))
    }

    /// Generate a fresh UUID-shaped id
    pub fn generate() -> Self {
        AssocId::new(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AssocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssocId({})", &self.0)
    }
}

impl From<&str> for AssocId {
    fn from(value: &str) -> Self {
        AssocId::new(value)
    }
}

impl From<String> for AssocId {
    fn from(value: String) -> Self {
        AssocId(Arc::from(value))
    }
}

impl From<&AssocId> for AssocId {
    fn from(value: &AssocId) -> Self {
        value.clone()
    }
}

impl AsRef<str> for AssocId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for AssocId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for AssocId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AssocId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(AssocId::from)
    }
}
