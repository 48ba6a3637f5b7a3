//! Bidirectional One↔Many index shared by the four relations.
//!
//! The One side maps a key to at most one target; the Many side is derived and
//! maps a target to every key pointing at it. Both directions are O(1) average.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::types::AssocId;

/// The four link fields of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// `type` / `typed`
    Type,
    /// `from` / `out`
    From,
    /// `to` / `in`
    To,
    /// `value` / `valued`
    Value,
}

impl Field {
    /// All fields, in dependency order
    pub const ALL: [Field; 4] = [Field::Type, Field::From, Field::To, Field::Value];

    /// Name of the One side
    pub fn one_name(&self) -> &'static str {
        match self {
            Field::Type => "type",
            Field::From => "from",
            Field::To => "to",
            Field::Value => "value",
        }
    }

    /// Name of the derived Many side
    pub fn many_name(&self) -> &'static str {
        match self {
            Field::Type => "typed",
            Field::From => "out",
            Field::To => "in",
            Field::Value => "valued",
        }
    }

    fn index(&self) -> usize {
        match self {
            Field::Type => 0,
            Field::From => 1,
            Field::To => 2,
            Field::Value => 3,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.one_name())
    }
}

/// One relation: key → target, target → {keys}
#[derive(Debug, Default)]
pub struct Relation {
    one: HashMap<AssocId, AssocId>,
    many: HashMap<AssocId, HashSet<AssocId>>,
}

impl Relation {
    /// Empty relation
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `key` at `value` (or unlink with `None`); returns the previous target
    pub fn set_one(&mut self, key: &AssocId, value: Option<&AssocId>) -> Option<AssocId> {
        let previous = match value {
            Some(target) => self.one.insert(key.clone(), target.clone()),
            None => self.one.remove(key),
        };
        if let Some(old) = &previous {
            self.detach(old, key);
        }
        if let Some(target) = value {
            self.many.entry(target.clone()).or_default().insert(key.clone());
        }
        previous
    }

    /// Target of `key`
    pub fn get_one(&self, key: &AssocId) -> Option<&AssocId> {
        self.one.get(key)
    }

    /// Keys pointing at `value`
    pub fn get_many(&self, value: &AssocId) -> Option<&HashSet<AssocId>> {
        self.many.get(value)
    }

    /// Number of keys pointing at `value`
    pub fn many_len(&self, value: &AssocId) -> usize {
        self.many.get(value).map_or(0, HashSet::len)
    }

    /// Remove the One entry of `key`; returns the previous target
    pub fn delete(&mut self, key: &AssocId) -> Option<AssocId> {
        self.set_one(key, None)
    }

    /// Drop the Many set held by `value` without touching the keys' One entries.
    ///
    /// Used on destruction: referrers keep pointing at the destroyed id until
    /// they are explicitly unlinked.
    pub fn drop_many(&mut self, value: &AssocId) -> Option<HashSet<AssocId>> {
        self.many.remove(value)
    }

    fn detach(&mut self, target: &AssocId, key: &AssocId) {
        if let Some(set) = self.many.get_mut(target) {
            set.remove(key);
            if set.is_empty() {
                self.many.remove(target);
            }
        }
    }
}

/// The four relations of a graph
#[derive(Debug, Default)]
pub struct Relations {
    relations: [Relation; 4],
}

impl Relations {
    /// Empty relation set
    pub fn new() -> Self {
        Self::default()
    }

    /// Relation for a field
    pub fn get(&self, field: Field) -> &Relation {
        &self.relations[field.index()]
    }

    /// Mutable relation for a field
    pub fn get_mut(&mut self, field: Field) -> &mut Relation {
        &mut self.relations[field.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(s: &str) -> AssocId {
        AssocId::new(s)
    }

    #[test]
    fn set_moves_membership_between_many_sets() {
        let mut rel = Relation::new();
        let (a, x, y) = (id("a"), id("x"), id("y"));

        assert_eq!(rel.set_one(&a, Some(&x)), None);
        assert!(rel.get_many(&x).unwrap().contains(&a));

        assert_eq!(rel.set_one(&a, Some(&y)), Some(x.clone()));
        assert!(rel.get_many(&x).is_none());
        assert!(rel.get_many(&y).unwrap().contains(&a));
        assert_eq!(rel.get_one(&a), Some(&y));
    }

    #[test]
    fn unset_removes_both_sides() {
        let mut rel = Relation::new();
        let (a, x) = (id("a"), id("x"));
        rel.set_one(&a, Some(&x));
        assert_eq!(rel.delete(&a), Some(x.clone()));
        assert_eq!(rel.get_one(&a), None);
        assert_eq!(rel.many_len(&x), 0);
    }

    #[test]
    fn self_reference_is_indexed() {
        let mut rel = Relation::new();
        let a = id("a");
        rel.set_one(&a, Some(&a));
        assert!(rel.get_many(&a).unwrap().contains(&a));
    }

    #[test]
    fn drop_many_keeps_referrers() {
        let mut rel = Relation::new();
        let (a, b) = (id("a"), id("b"));
        rel.set_one(&b, Some(&a));
        rel.drop_many(&a);
        assert_eq!(rel.get_one(&b), Some(&a));
        assert_eq!(rel.many_len(&a), 0);
        // Relinking later must not trip over the dropped set.
        rel.set_one(&b, None);
        assert_eq!(rel.get_one(&b), None);
    }

    proptest! {
        #[test]
        fn one_and_many_stay_symmetric(ops in proptest::collection::vec((0u8..6, proptest::option::of(0u8..6)), 1..80)) {
            let mut rel = Relation::new();
            for (key, target) in &ops {
                let key = id(&format!("n{key}"));
                let target = target.map(|t| id(&format!("n{t}")));
                rel.set_one(&key, target.as_ref());
            }
            for k in 0..6u8 {
                let key = id(&format!("n{k}"));
                for t in 0..6u8 {
                    let target = id(&format!("n{t}"));
                    let points = rel.get_one(&key) == Some(&target);
                    let member = rel.get_many(&target).map_or(false, |s| s.contains(&key));
                    prop_assert_eq!(points, member);
                }
            }
        }
    }
}
