//! Folder snapshots.
//!
//! A [`Snapshot`] maps every regular file under a sync root to its last
//! modification time. Two snapshots taken one interval apart are all the
//! change detector needs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{trace, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::{ARCHIVE_DIR, SyncPath};

/// Modification times of every file under a root, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: HashMap<SyncPath, SystemTime>,
}

impl Snapshot {
    /// An empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one file.
    pub fn insert(&mut self, path: SyncPath, modified: SystemTime) {
        self.entries.insert(path, modified);
    }

    /// Modification time of a file, if present.
    pub fn get(&self, path: &SyncPath) -> Option<SystemTime> {
        self.entries.get(path).copied()
    }

    /// Whether a file is present.
    pub fn contains(&self, path: &SyncPath) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot has no files.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&SyncPath, SystemTime)> {
        self.entries.iter().map(|(p, t)| (p, *t))
    }
}

impl FromIterator<(SyncPath, SystemTime)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (SyncPath, SystemTime)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Walks a sync root and produces snapshots.
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    /// Scanner over `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory being scanned.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Take a snapshot.
    ///
    /// Never fails as a whole. Entries that vanish mid-walk, cannot be
    /// stat'ed, or have non-UTF-8 names are skipped. A missing root yields an
    /// empty snapshot. Symlinks are not followed and the archive directory is
    /// never entered.
    pub fn scan(&self) -> Snapshot {
        let mut snapshot = Snapshot::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !is_archive_dir(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    trace!("skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let modified = match entry.metadata().map(|m| m.modified()) {
                Ok(Ok(modified)) => modified,
                Ok(Err(e)) => {
                    trace!("no mtime for {}: {}", entry.path().display(), e);
                    continue;
                }
                Err(e) => {
                    trace!("cannot stat {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            match SyncPath::from_local(&self.root, entry.path()) {
                Ok(path) => snapshot.insert(path, modified),
                Err(e) => warn!("not syncing {}: {}", entry.path().display(), e),
            }
        }

        snapshot
    }
}

fn is_archive_dir(entry: &DirEntry) -> bool {
    entry.depth() == 1 && entry.file_type().is_dir() && entry.file_name() == ARCHIVE_DIR
}
