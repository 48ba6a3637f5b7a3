//! Storage marking catalog: which associations belong to which storage.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::AssocId;

/// Storage membership marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageMarker {
    /// This association is stored (not inherited)
    OneTrue,
    /// This association is explicitly not stored (not inherited)
    OneFalse,
    /// This association and everything typed by it, transitively, is stored
    TypedTrue,
    /// Associations typed by this one are not stored
    TypedFalse,
}

impl StorageMarker {
    /// Whether the marker is inherited along `typed`
    pub fn is_inherited(&self) -> bool {
        matches!(self, StorageMarker::TypedTrue | StorageMarker::TypedFalse)
    }

    /// Camel-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMarker::OneTrue => "oneTrue",
            StorageMarker::OneFalse => "oneFalse",
            StorageMarker::TypedTrue => "typedTrue",
            StorageMarker::TypedFalse => "typedFalse",
        }
    }
}

/// `assoc → storage → {marker}` with empty sets pruned
#[derive(Debug, Default)]
pub struct MarkerCatalog {
    markers: HashMap<AssocId, HashMap<AssocId, HashSet<StorageMarker>>>,
}

impl MarkerCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a marker; returns false if it was already present
    pub fn set(&mut self, id: &AssocId, storage: &AssocId, marker: StorageMarker) -> bool {
        self.markers
            .entry(id.clone())
            .or_default()
            .entry(storage.clone())
            .or_default()
            .insert(marker)
    }

    /// Remove a marker; returns false if it was not present
    pub fn delete(&mut self, id: &AssocId, storage: &AssocId, marker: StorageMarker) -> bool {
        let Some(by_storage) = self.markers.get_mut(id) else {
            return false;
        };
        let Some(set) = by_storage.get_mut(storage) else {
            return false;
        };
        let removed = set.remove(&marker);
        if set.is_empty() {
            by_storage.remove(storage);
        }
        if by_storage.is_empty() {
            self.markers.remove(id);
        }
        removed
    }

    /// Markers `id` carries for `storage`
    pub fn get(&self, id: &AssocId, storage: &AssocId) -> Option<&HashSet<StorageMarker>> {
        self.markers.get(id).and_then(|by_storage| by_storage.get(storage))
    }

    /// Whether `id` carries `marker` for `storage`
    pub fn has(&self, id: &AssocId, storage: &AssocId, marker: StorageMarker) -> bool {
        self.get(id, storage).map_or(false, |set| set.contains(&marker))
    }

    /// Ids carrying any marker for `storage`
    pub fn marked_for<'a>(&'a self, storage: &'a AssocId) -> impl Iterator<Item = &'a AssocId> + 'a {
        self.markers
            .iter()
            .filter(move |(_, by_storage)| by_storage.contains_key(storage))
            .map(|(id, _)| id)
    }

    /// Drop every marker recorded for `storage`
    pub fn remove_storage(&mut self, storage: &AssocId) {
        self.markers.retain(|_, by_storage| {
            by_storage.remove(storage);
            !by_storage.is_empty()
        });
    }

    /// Drop every marker of `id`; returns what was removed
    pub fn remove_all(&mut self, id: &AssocId) -> Vec<(AssocId, StorageMarker)> {
        self.markers
            .remove(id)
            .map(|by_storage| {
                by_storage
                    .into_iter()
                    .flat_map(|(storage, set)| set.into_iter().map(move |m| (storage.clone(), m)))
                    .collect()
            })
            .unwrap_or_default()
    }
}
