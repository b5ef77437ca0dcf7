//! Applying received changes to the local folder.
//!
//! When received changes land in the watched folder, the next scan would
//! report them as local edits and send them straight back. The [`Applier`]
//! records the state it leaves each file in, and the watch loop asks it
//! whether a detected change is such an echo before sending.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use super::error::ClientError;
use crate::core::{ChangeAction, SyncPath};
use crate::sync::VersionArchive;
use crate::transport::ChangeEvent;

/// Last state a received change left a file in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppliedState {
    Written(SystemTime),
    Removed,
}

/// Outcome of applying one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// File contents were written.
    Written,
    /// File was removed.
    Removed,
    /// Delete for a file that does not exist.
    Absent,
    /// Change addressed into the version archive, or through a symlink
    /// inside the apply root; ignored.
    Refused,
}

/// Writes received changes into the apply root and archives their payloads.
#[derive(Debug)]
pub struct Applier {
    root: PathBuf,
    archive: Arc<VersionArchive>,
    track_echoes: bool,
    ledger: Mutex<HashMap<SyncPath, AppliedState>>,
}

impl Applier {
    /// Applier writing under `root`.
    ///
    /// Set `track_echoes` when `root` is also the watched folder.
    pub fn new(root: impl Into<PathBuf>, archive: Arc<VersionArchive>, track_echoes: bool) -> Self {
        Self {
            root: root.into(),
            archive,
            track_echoes,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Folder that changes are written into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Apply one change.
    ///
    /// Add and modify archive the payload first (when a version is present),
    /// then write the file, creating parent directories. Delete removes the
    /// file if it exists and is a no-op otherwise. Blocking; call from a
    /// blocking context.
    pub fn apply(&self, event: &ChangeEvent) -> Result<ApplyOutcome, ClientError> {
        if event.path.is_archive() {
            warn!("refusing change to archive path {}", event.path);
            return Ok(ApplyOutcome::Refused);
        }
        let target = event.path.to_local(&self.root);
        let linked = crosses_symlink(&self.root, &event.path).map_err(|source| {
            ClientError::Apply {
                path: target.clone(),
                source,
            }
        })?;
        if linked {
            warn!("refusing change to {} through a symlink", event.path);
            return Ok(ApplyOutcome::Refused);
        }

        // Held across the filesystem change so the watch loop cannot observe
        // the new state before it is recorded.
        let mut ledger = self.lock();

        if event.action == ChangeAction::Delete {
            return match fs::remove_file(&target) {
                Ok(()) => {
                    if self.track_echoes {
                        ledger.insert(event.path.clone(), AppliedState::Removed);
                    }
                    info!("removed {}", event.path);
                    Ok(ApplyOutcome::Removed)
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("delete for absent file {}", event.path);
                    Ok(ApplyOutcome::Absent)
                }
                Err(source) => Err(ClientError::Apply {
                    path: target,
                    source,
                }),
            };
        }

        if let Some(version) = &event.version {
            self.archive.save(&event.path, version, &event.payload)?;
        }

        let modified = write_file(&target, &event.payload).map_err(|source| ClientError::Apply {
            path: target.clone(),
            source,
        })?;
        if self.track_echoes {
            ledger.insert(event.path.clone(), AppliedState::Written(modified));
        }
        info!(
            "received {} {} ({} bytes)",
            event.action,
            event.path,
            event.payload.len()
        );
        Ok(ApplyOutcome::Written)
    }

    /// Whether a locally detected change only reflects a change this applier
    /// made.
    ///
    /// A written file counts as an echo for as long as its modification time
    /// is the one the write left behind; the first differing report consumes
    /// the record. A removal counts once.
    pub fn is_echo(&self, action: ChangeAction, path: &SyncPath) -> bool {
        if !self.track_echoes {
            return false;
        }
        let mut ledger = self.lock();
        let Some(applied) = ledger.get(path).copied() else {
            return false;
        };

        let echo = match (action, applied) {
            (ChangeAction::Delete, AppliedState::Removed) => {
                ledger.remove(path);
                return true;
            }
            (ChangeAction::Add | ChangeAction::Modify, AppliedState::Written(at)) => {
                let current = fs::metadata(path.to_local(&self.root)).and_then(|m| m.modified());
                matches!(current, Ok(now) if now == at)
            }
            _ => false,
        };
        if !echo {
            ledger.remove(path);
        }
        echo
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SyncPath, AppliedState>> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether any existing component of `path` under `root` is a symlink.
///
/// The scanner never follows links, so nothing behind one is ever synced.
fn crosses_symlink(root: &Path, path: &SyncPath) -> io::Result<bool> {
    let mut current = root.to_path_buf();
    for segment in path.segments() {
        current.push(segment);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return Ok(true),
            Ok(_) => {}
            // Nothing further down exists yet.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(false)
}

fn write_file(target: &Path, payload: &[u8]) -> io::Result<SystemTime> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(target, payload)?;
    fs::metadata(target)?.modified()
}
