//! Wire-level projection of associations exchanged with storage backends.
//!
//! Field names follow the `_`-prefixed schema shared by every transport:
//! `_id`, `_type`, `_from`, `_to`, `_value`, `_created_at`, `_updated_at`, `_i`,
//! one of `_string` / `_number` / `_function`, and `_protected`.

use serde::{Deserialize, Serialize};

use crate::types::{AssocId, Data};

/// One association as seen by a storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageLink {
    /// Association id
    #[serde(rename = "_id")]
    pub id: AssocId,

    /// Type link
    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub type_id: Option<AssocId>,

    /// From link
    #[serde(rename = "_from", default, skip_serializing_if = "Option::is_none")]
    pub from: Option<AssocId>,

    /// To link
    #[serde(rename = "_to", default, skip_serializing_if = "Option::is_none")]
    pub to: Option<AssocId>,

    /// Value link
    #[serde(rename = "_value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AssocId>,

    /// Creation time (ms since epoch)
    #[serde(rename = "_created_at", default)]
    pub created_at: i64,

    /// Last own-field mutation (ms since epoch)
    #[serde(rename = "_updated_at", default)]
    pub updated_at: i64,

    /// Sequence number, immutable after first insert
    #[serde(rename = "_i", default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    /// String payload
    #[serde(rename = "_string", default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,

    /// Number payload
    #[serde(rename = "_number", default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f64>,

    /// Function payload (source text)
    #[serde(rename = "_function", default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    /// Exempt from deletion during reconciliation
    #[serde(rename = "_protected", default, skip_serializing_if = "Option::is_none")]
    pub protected: Option<bool>,
}

impl StorageLink {
    /// Bare link carrying only an id
    pub fn new(id: impl Into<AssocId>) -> Self {
        Self {
            id: id.into(),
            type_id: None,
            from: None,
            to: None,
            value: None,
            created_at: 0,
            updated_at: 0,
            sequence: None,
            string: None,
            number: None,
            function: None,
            protected: None,
        }
    }

    /// Payload carried by this link, if any.
    ///
    /// The wire fields are mutually exclusive; when a malformed link carries
    /// several, `_string` wins over `_number` over `_function`.
    pub fn data(&self) -> Option<Data> {
        if let Some(s) = &self.string {
            Some(Data::String(s.clone()))
        } else if let Some(n) = self.number {
            Some(Data::Number(n))
        } else {
            self.function.as_ref().map(|f| Data::Function(f.clone()))
        }
    }

    /// Replace the payload fields from a graph payload. Arrays are not projected.
    pub fn set_data(&mut self, data: Option<&Data>) {
        self.string = None;
        self.number = None;
        self.function = None;
        match data {
            Some(Data::String(s)) => self.string = Some(s.clone()),
            Some(Data::Number(n)) => self.number = Some(*n),
            Some(Data::Function(f)) => self.function = Some(f.clone()),
            Some(Data::Array(_)) | None => {}
        }
    }

    /// Ids this link points at through `type`, `from`, `to` and `value`
    pub fn references(&self) -> impl Iterator<Item = &AssocId> {
        [&self.type_id, &self.from, &self.to, &self.value]
            .into_iter()
            .flatten()
    }

    /// Whether the link is flagged protected
    pub fn is_protected(&self) -> bool {
        self.protected.unwrap_or(false)
    }
}

/// Full snapshot of a storage's marked associations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageDump {
    /// Ids in sequence order, used to seed a restoring graph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<AssocId>>,

    /// Projected links
    pub links: Vec<StorageLink>,
}

impl StorageDump {
    /// Dump without an id list
    pub fn from_links(links: Vec<StorageLink>) -> Self {
        Self { ids: None, links }
    }

    /// Whether the dump carries no links
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Operation carried by a [`StorageDelta`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaOperation {
    /// Create the association
    Insert,
    /// Overwrite changed fields
    Update,
    /// Destroy the association
    Delete,
}

impl DeltaOperation {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaOperation::Insert => "insert",
            DeltaOperation::Update => "update",
            DeltaOperation::Delete => "delete",
        }
    }
}

/// Single insert/update/delete against a storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDelta {
    /// Operation kind
    pub operation: DeltaOperation,

    /// Target id (required for delete)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AssocId>,

    /// Link (required for insert/update)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<StorageLink>,
}

impl StorageDelta {
    /// Insert delta
    pub fn insert(link: StorageLink) -> Self {
        Self { operation: DeltaOperation::Insert, id: Some(link.id.clone()), link: Some(link) }
    }

    /// Update delta
    pub fn update(link: StorageLink) -> Self {
        Self { operation: DeltaOperation::Update, id: Some(link.id.clone()), link: Some(link) }
    }

    /// Delete delta
    pub fn delete(id: impl Into<AssocId>) -> Self {
        Self { operation: DeltaOperation::Delete, id: Some(id.into()), link: None }
    }

    /// Target id, from `id` or the link's `_id`
    pub fn target(&self) -> Option<&AssocId> {
        self.id.as_ref().or(self.link.as_ref().map(|l| &l.id))
    }
}
