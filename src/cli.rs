//! Offline tooling over dump files.
//!
//! Each command reads `StorageDump` JSON files and returns what the binary
//! prints, so the commands are testable without a terminal.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::info;

use crate::delta::{self, SubscriptionReport};
use crate::types::{Result, StorageDump};

/// Read a dump from a JSON file
pub fn read_dump(path: impl AsRef<Path>) -> Result<StorageDump> {
    let contents = fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&contents)?)
}

/// The dump with its links in dependency order, as pretty JSON
pub fn run_sort(path: impl AsRef<Path>) -> Result<String> {
    let mut dump = read_dump(path)?;
    dump.links = delta::sort_dump(dump.links, true)?;
    Ok(serde_json::to_string_pretty(&dump)?)
}

/// Restore the dump into a fresh graph and summarize it
pub fn run_inspect(path: impl AsRef<Path>) -> Result<String> {
    let dump = read_dump(path)?;
    let restored = delta::restore(&dump)?;
    let graph = &restored.graph;

    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    for link in &dump.links {
        let key = graph
            .type_of(&link.id)
            .map(ToString::to_string)
            .unwrap_or_else(|| "(untyped)".to_string());
        *by_type.entry(key).or_default() += 1;
    }

    let mut out = format!(
        "root: {}\nassociations: {}\nstored: {}\n",
        graph.root(),
        dump.links.len(),
        graph.stored_ids(&restored.storage).len()
    );
    for (type_id, count) in by_type {
        out.push_str(&format!("  {type_id}: {count}\n"));
    }
    Ok(out)
}

/// Fold several dumps last-writer-wins and write the result to `output`
pub fn run_merge<P: AsRef<Path>>(inputs: &[P], output: impl AsRef<Path>) -> Result<SubscriptionReport> {
    let Some((first, rest)) = inputs.split_first() else {
        return Err(crate::types::Error::invalid_argument("merge needs at least one dump"));
    };

    let mut restored = delta::restore(&read_dump(first)?)?;
    let mut total = restored.report;
    for path in rest {
        let report = delta::merge_dump(&mut restored.graph, &read_dump(path)?, &restored.storage)?;
        total.inserted += report.inserted;
        total.updated += report.updated;
        total.skipped += report.skipped;
    }

    let merged = delta::generate_dump(&restored.graph, &restored.storage)?;
    fs::write(output.as_ref(), serde_json::to_string_pretty(&merged)?)?;
    info!(inputs = inputs.len(), links = merged.links.len(), "dumps merged");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssocId, StorageLink};

    fn link(id: &str, sequence: u64, type_id: Option<&str>, updated_at: i64) -> StorageLink {
        let mut link = StorageLink::new(id);
        link.sequence = Some(sequence);
        link.type_id = type_id.map(AssocId::new);
        link.created_at = 1;
        link.updated_at = updated_at;
        link
    }

    fn write_dump(dir: &tempfile::TempDir, name: &str, links: Vec<StorageLink>) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, serde_json::to_string(&StorageDump::from_links(links)).unwrap()).unwrap();
        path
    }

    #[test]
    fn sort_puts_dependencies_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dump(
            &dir,
            "dump.json",
            vec![link("a", 3, Some("b"), 1), link("b", 2, Some("c"), 1), link("c", 1, None, 1)],
        );

        let sorted: StorageDump = serde_json::from_str(&run_sort(&path).unwrap()).unwrap();
        let ids: Vec<&str> = sorted.links.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn inspect_counts_by_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dump(
            &dir,
            "dump.json",
            vec![link("r", 0, None, 1), link("kind", 20, Some("r"), 1), link("x", 21, Some("kind"), 1)],
        );

        let summary = run_inspect(&path).unwrap();
        assert!(summary.starts_with("root: r\nassociations: 3\n"));
        assert!(summary.contains("  kind: 1\n"));
        assert!(summary.contains("  r: 1\n"));
        assert!(summary.contains("  (untyped): 1\n"));
    }

    #[test]
    fn merge_keeps_the_newest_link() {
        let dir = tempfile::tempdir().unwrap();
        let old = link("item", 20, Some("r"), 10);
        let mut new = link("item", 20, Some("r"), 20);
        new.to = Some(AssocId::new("r"));
        let first = write_dump(&dir, "a.json", vec![link("r", 0, None, 1), old]);
        let second = write_dump(&dir, "b.json", vec![link("r", 0, None, 1), new, link("other", 21, Some("r"), 5)]);
        let output = dir.path().join("merged.json");

        let report = run_merge(&[first, second], &output).unwrap();
        assert_eq!(report.inserted, 2);
        assert!(report.updated >= 1);

        let merged = read_dump(&output).unwrap();
        let item = merged.links.iter().find(|l| l.id.as_str() == "item").unwrap();
        assert_eq!(item.updated_at, 20);
        assert_eq!(item.to.as_ref().map(AssocId::as_str), Some("r"));
        assert!(merged.links.iter().any(|l| l.id.as_str() == "other"));
    }

    #[test]
    fn unreadable_input_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_sort(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, crate::types::Error::Io(_)));
    }
}
