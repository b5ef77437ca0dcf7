//! Local version archive.
//!
//! Every add or modify payload a peer sends or applies is kept on disk under
//! `<root>/.versions/<path>/<version>.version`, next to an in-memory history
//! per path. The history only ever grows; deleting a file does not touch it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::core::{ARCHIVE_DIR, SyncPath, VersionId};

/// Errors raised by the version archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Writing a version file failed.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Reading a version file failed for a reason other than absence.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Walking the archive directory failed.
    #[error("failed to scan archive: {0}")]
    Scan(#[from] walkdir::Error),
}

/// Version archive rooted at one sync folder.
///
/// Safe to share between the receive and watch tasks of a session.
#[derive(Debug)]
pub struct VersionArchive {
    dir: PathBuf,
    histories: Mutex<HashMap<SyncPath, Vec<VersionId>>>,
}

impl VersionArchive {
    /// Archive for `sync_root` with an empty history.
    ///
    /// Nothing is created on disk until the first save.
    pub fn new(sync_root: impl AsRef<Path>) -> Self {
        Self {
            dir: sync_root.as_ref().join(ARCHIVE_DIR),
            histories: Mutex::new(HashMap::new()),
        }
    }

    /// Archive for `sync_root`, with histories reloaded from disk.
    ///
    /// Reloaded histories are ordered by version token: legacy timestamp
    /// tokens numerically and before any other token, the rest by text. Files that are not
    /// version files are ignored. A missing archive directory is an empty
    /// archive.
    pub fn open(sync_root: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let archive = Self::new(sync_root);
        if !archive.dir.is_dir() {
            return Ok(archive);
        }

        let mut histories: HashMap<SyncPath, Vec<VersionId>> = HashMap::new();
        for entry in WalkDir::new(&archive.dir).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(version) = entry.file_name().to_str().and_then(VersionId::from_file_name)
            else {
                trace!("ignoring {} in archive", entry.path().display());
                continue;
            };
            let Some(parent) = entry.path().parent() else {
                continue;
            };
            match SyncPath::from_local(&archive.dir, parent) {
                Ok(path) => histories.entry(path).or_default().push(version),
                Err(e) => debug!("ignoring {}: {}", entry.path().display(), e),
            }
        }

        for versions in histories.values_mut() {
            versions.sort_by(reload_order);
        }
        debug!(
            "reloaded archive history for {} paths from {}",
            histories.len(),
            archive.dir.display()
        );

        *archive.lock() = histories;
        Ok(archive)
    }

    /// The archive directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of one archived version on disk.
    pub fn version_file(&self, path: &SyncPath, version: &VersionId) -> PathBuf {
        path.to_local(&self.dir).join(version.file_name())
    }

    /// Store a payload and append its version to the path's history.
    ///
    /// Saving a version that is already in the history rewrites the file
    /// without adding a second history entry.
    pub fn save(
        &self,
        path: &SyncPath,
        version: &VersionId,
        payload: &[u8],
    ) -> Result<(), ArchiveError> {
        let target = self.version_file(path, version);
        write_atomic(&target, payload).map_err(|source| ArchiveError::Write {
            path: target.clone(),
            source,
        })?;

        let mut histories = self.lock();
        let history = histories.entry(path.clone()).or_default();
        if !history.contains(version) {
            history.push(version.clone());
        }
        trace!("archived {} version {} ({} bytes)", path, version, payload.len());
        Ok(())
    }

    /// Versions recorded for a path, oldest first.
    pub fn list_versions(&self, path: &SyncPath) -> Vec<VersionId> {
        self.lock().get(path).cloned().unwrap_or_default()
    }

    /// Every path with at least one recorded version, sorted.
    pub fn paths(&self) -> Vec<SyncPath> {
        let mut paths: Vec<_> = self.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// The `ordinal`-th version of a path, counting from 1.
    pub fn version_at(&self, path: &SyncPath, ordinal: usize) -> Option<VersionId> {
        let index = ordinal.checked_sub(1)?;
        self.lock().get(path)?.get(index).cloned()
    }

    /// Read back an archived payload.
    ///
    /// Returns `Ok(None)` when no such version file exists.
    pub fn restore(
        &self,
        path: &SyncPath,
        version: &VersionId,
    ) -> Result<Option<Vec<u8>>, ArchiveError> {
        let target = self.version_file(path, version);
        match fs::read(&target) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArchiveError::Read {
                path: target,
                source,
            }),
        }
    }

    /// Read back the `ordinal`-th version of a path, counting from 1.
    pub fn restore_ordinal(
        &self,
        path: &SyncPath,
        ordinal: usize,
    ) -> Result<Option<Vec<u8>>, ArchiveError> {
        match self.version_at(path, ordinal) {
            Some(version) => self.restore(path, &version),
            None => Ok(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SyncPath, Vec<VersionId>>> {
        self.histories.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write through a sibling temp file and rename it into place.
/// Order of reloaded versions. Total, so sorting never sees an inconsistent
/// comparison.
fn reload_order(a: &VersionId, b: &VersionId) -> Ordering {
    match (legacy_timestamp(a), legacy_timestamp(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Value of a decimal timestamp token such as `1700000000.25`.
fn legacy_timestamp(version: &VersionId) -> Option<f64> {
    let token = version.as_str();
    // Generated tokens are 32 hex digits and may be all decimal.
    if token.len() > 24 || token.bytes().filter(|b| *b == b'.').count() > 1 {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    token.parse().ok()
}

fn write_atomic(target: &Path, payload: &[u8]) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no parent directory"))?;
    fs::create_dir_all(parent)?;

    let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = parent.join(tmp_name);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(payload)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, target)
}
