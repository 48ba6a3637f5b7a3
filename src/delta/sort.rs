//! Dependency ordering of dump batches.

use std::collections::{HashMap, HashSet};

use crate::types::{AssocId, StorageLink, SyncError};

/// Order `links` so every link comes after the in-batch links it references.
///
/// With `resort_by_sequence` the batch is first stably sorted by `_i` (links
/// without one last) so independent links keep creation order. References to
/// ids outside the batch and self-references are ignored. A dependency cycle
/// is reported with the id of the link revisited while still in progress.
pub fn sort_dump(mut links: Vec<StorageLink>, resort_by_sequence: bool) -> Result<Vec<StorageLink>, SyncError> {
    if resort_by_sequence {
        links.sort_by_key(|link| link.sequence.unwrap_or(u64::MAX));
    }

    let dependencies: Vec<Vec<usize>> = {
        let position: HashMap<&AssocId, usize> =
            links.iter().enumerate().map(|(i, link)| (&link.id, i)).collect();
        links
            .iter()
            .enumerate()
            .map(|(i, link)| {
                let mut deps: Vec<usize> = link
                    .references()
                    .filter_map(|reference| position.get(reference).copied())
                    .filter(|&j| j != i)
                    .collect();
                deps.dedup();
                deps
            })
            .collect()
    };

    let mut processing = HashSet::new();
    let mut processed = HashSet::new();
    let mut order = Vec::with_capacity(links.len());
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start in 0..links.len() {
        if processed.contains(&start) {
            continue;
        }
        processing.insert(start);
        stack.push((start, 0));

        while let Some(top) = stack.last_mut() {
            let (node, cursor) = *top;
            match dependencies[node].get(cursor) {
                Some(&dependency) => {
                    top.1 += 1;
                    if processed.contains(&dependency) {
                        continue;
                    }
                    if !processing.insert(dependency) {
                        return Err(SyncError::CircularDependency { id: links[dependency].id.clone() });
                    }
                    stack.push((dependency, 0));
                }
                None => {
                    stack.pop();
                    processing.remove(&node);
                    processed.insert(node);
                    order.push(node);
                }
            }
        }
    }

    let mut slots: Vec<Option<StorageLink>> = links.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(id: &str, sequence: u64, type_id: Option<&str>) -> StorageLink {
        let mut link = StorageLink::new(id);
        link.sequence = Some(sequence);
        link.type_id = type_id.map(AssocId::new);
        link
    }

    fn ids(links: &[StorageLink]) -> Vec<&str> {
        links.iter().map(|l| l.id.as_str()).collect()
    }

    #[test]
    fn dependencies_come_first() {
        // a -> b -> c
        let links = vec![link("a", 1, Some("b")), link("b", 2, Some("c")), link("c", 3, None)];
        let sorted = sort_dump(links, true).unwrap();
        assert_eq!(ids(&sorted), vec!["c", "b", "a"]);
    }

    #[test]
    fn independent_links_keep_sequence_order() {
        let links = vec![link("z", 9, None), link("y", 2, None), link("x", 5, Some("y"))];
        assert_eq!(ids(&sort_dump(links.clone(), true).unwrap()), vec!["y", "x", "z"]);
        assert_eq!(ids(&sort_dump(links, false).unwrap()), vec!["z", "y", "x"]);
    }

    #[test]
    fn three_cycle_is_reported() {
        let links = vec![link("a", 1, Some("b")), link("b", 2, Some("c")), link("c", 3, Some("a"))];
        let err = sort_dump(links, true).unwrap_err();
        assert!(matches!(err, SyncError::CircularDependency { id } if id.as_str() == "a"));
    }

    #[test]
    fn self_and_external_references_are_ignored() {
        let mut a = link("a", 1, Some("a"));
        a.from = Some(AssocId::new("outside"));
        let sorted = sort_dump(vec![a, link("b", 2, Some("a"))], true).unwrap();
        assert_eq!(ids(&sorted), vec!["a", "b"]);
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let mut links: Vec<StorageLink> = (0..10_000u64)
            .map(|i| link(&format!("n{i}"), i, (i > 0).then(|| format!("n{}", i - 1)).as_deref()))
            .collect();
        links.reverse();
        let sorted = sort_dump(links, false).unwrap();
        assert_eq!(sorted.first().map(|l| l.id.as_str()), Some("n0"));
        assert_eq!(sorted.len(), 10_000);
    }
}
