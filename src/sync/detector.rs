//! Change detection by snapshot diff.

use std::collections::BTreeSet;
use std::path::PathBuf;

use super::snapshot::{Scanner, Snapshot};
use crate::core::{ChangeAction, SyncPath};

/// Paths that changed between two snapshots.
///
/// Each set is ordered, so events for one scan are emitted in a stable order:
/// additions, then modifications, then deletions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Present now, absent before.
    pub added: BTreeSet<SyncPath>,
    /// Present in both with a different modification time.
    pub modified: BTreeSet<SyncPath>,
    /// Absent now, present before.
    pub deleted: BTreeSet<SyncPath>,
}

impl ChangeSet {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    /// Total number of changed paths.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.deleted.len()
    }

    /// Iterate over every change with its action.
    pub fn iter(&self) -> impl Iterator<Item = (ChangeAction, &SyncPath)> {
        let added = self.added.iter().map(|p| (ChangeAction::Add, p));
        let modified = self.modified.iter().map(|p| (ChangeAction::Modify, p));
        let deleted = self.deleted.iter().map(|p| (ChangeAction::Delete, p));
        added.chain(modified).chain(deleted)
    }
}

/// Compare two snapshots.
///
/// Any difference in modification time counts as a modification, including a
/// time that moved backwards.
pub fn diff(old: &Snapshot, new: &Snapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (path, modified) in new.iter() {
        match old.get(path) {
            None => {
                changes.added.insert(path.clone());
            }
            Some(previous) if previous != modified => {
                changes.modified.insert(path.clone());
            }
            Some(_) => {}
        }
    }

    for (path, _) in old.iter() {
        if !new.contains(path) {
            changes.deleted.insert(path.clone());
        }
    }

    changes
}

/// Keeps the baseline snapshot of one folder and diffs new scans against it.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    scanner: Scanner,
    current: Snapshot,
}

impl ChangeDetector {
    /// Take the initial snapshot of `root`.
    ///
    /// Files already present at this point are never reported as added.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let scanner = Scanner::new(root);
        let current = scanner.scan();
        Self { scanner, current }
    }

    /// The scanner used for each poll.
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// The current baseline.
    pub fn snapshot(&self) -> &Snapshot {
        &self.current
    }

    /// Diff `next` against the baseline and make it the new baseline.
    pub fn advance(&mut self, next: Snapshot) -> ChangeSet {
        let changes = diff(&self.current, &next);
        self.current = next;
        changes
    }

    /// Rescan and diff.
    pub fn poll(&mut self) -> ChangeSet {
        let next = self.scanner.scan();
        self.advance(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn path(s: &str) -> SyncPath {
        SyncPath::new(s).unwrap()
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_diff_classifies() {
        let old: Snapshot = [
            (path("same.txt"), at(1)),
            (path("changed.txt"), at(1)),
            (path("gone.txt"), at(1)),
        ]
        .into_iter()
        .collect();
        let new: Snapshot = [
            (path("same.txt"), at(1)),
            (path("changed.txt"), at(2)),
            (path("new.txt"), at(2)),
        ]
        .into_iter()
        .collect();

        let changes = diff(&old, &new);
        assert_eq!(changes.added, BTreeSet::from([path("new.txt")]));
        assert_eq!(changes.modified, BTreeSet::from([path("changed.txt")]));
        assert_eq!(changes.deleted, BTreeSet::from([path("gone.txt")]));
        assert_eq!(changes.len(), 3);
    }

    #[test]
    fn test_diff_backwards_mtime_is_modify() {
        let old: Snapshot = [(path("f"), at(10))].into_iter().collect();
        let new: Snapshot = [(path("f"), at(5))].into_iter().collect();
        assert_eq!(diff(&old, &new).modified.len(), 1);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let snap: Snapshot = [(path("f"), at(1))].into_iter().collect();
        assert!(diff(&snap, &snap).is_empty());
    }

    #[test]
    fn test_iter_order() {
        let old: Snapshot = [(path("d"), at(1)), (path("m"), at(1))].into_iter().collect();
        let new: Snapshot = [(path("m"), at(2)), (path("a"), at(1))].into_iter().collect();
        let order: Vec<_> = diff(&old, &new)
            .iter()
            .map(|(action, p)| (action, p.as_str().to_string()))
            .collect();
        assert_eq!(
            order,
            vec![
                (ChangeAction::Add, "a".to_string()),
                (ChangeAction::Modify, "m".to_string()),
                (ChangeAction::Delete, "d".to_string()),
            ]
        );
    }

    #[test]
    fn test_detector_ignores_preexisting_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.txt"), b"x").unwrap();

        let mut detector = ChangeDetector::new(dir.path());
        assert_eq!(detector.snapshot().len(), 1);
        assert!(detector.poll().is_empty());

        fs::write(dir.path().join("new.txt"), b"y").unwrap();
        let changes = detector.poll();
        assert_eq!(changes.added, BTreeSet::from([path("new.txt")]));

        fs::remove_file(dir.path().join("old.txt")).unwrap();
        let changes = detector.poll();
        assert_eq!(changes.deleted, BTreeSet::from([path("old.txt")]));
        assert!(changes.added.is_empty());
    }
}
