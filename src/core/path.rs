//! Relative paths inside a sync root.
//!
//! Every path that crosses the wire or is used as an archive key is a
//! [`SyncPath`]: relative, `/`-separated, and unable to escape the root it is
//! joined onto.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use super::constants::ARCHIVE_DIR;
use super::error::PathError;

/// A validated path relative to a sync root.
///
/// Invariants:
/// - at least one component
/// - no `..`, root, or drive-prefix components
/// - components are joined with `/` regardless of the local platform
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyncPath(String);

impl SyncPath {
    /// Parse a wire path.
    ///
    /// Both `/` and `\` are accepted as separators so that peers on Windows
    /// interoperate. Empty and `.` segments are dropped.
    pub fn new(raw: &str) -> Result<Self, PathError> {
        if raw.contains('\0') {
            return Err(PathError::InvalidComponent(raw.to_string()));
        }
        if raw.starts_with('/') || raw.starts_with('\\') {
            return Err(PathError::Absolute(raw.to_string()));
        }

        let mut parts: Vec<&str> = Vec::new();
        for (idx, segment) in raw.split(['/', '\\']).enumerate() {
            match segment {
                "" | "." => continue,
                ".." => return Err(PathError::Traversal(raw.to_string())),
                s if idx == 0 && is_drive_prefix(s) => {
                    return Err(PathError::Absolute(raw.to_string()));
                }
                s => parts.push(s),
            }
        }

        if parts.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self(parts.join("/")))
    }

    /// Build a sync path from a local file under `root`.
    ///
    /// Names that would read differently on the wire are rejected: a `\`
    /// inside a component, or a first component that looks like a drive.
    pub fn from_local(root: &Path, path: &Path) -> Result<Self, PathError> {
        let relative = path
            .strip_prefix(root)
            .map_err(|_| PathError::OutsideRoot(path.to_path_buf()))?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(os) => {
                    let part = os
                        .to_str()
                        .ok_or_else(|| PathError::NonUtf8(path.to_path_buf()))?;
                    if part.contains(['\\', '\0']) {
                        return Err(PathError::InvalidComponent(relative.display().to_string()));
                    }
                    if parts.is_empty() && is_drive_prefix(part) {
                        return Err(PathError::Absolute(relative.display().to_string()));
                    }
                    parts.push(part);
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(PathError::Traversal(relative.display().to_string()));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathError::Absolute(relative.display().to_string()));
                }
            }
        }

        if parts.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self(parts.join("/")))
    }

    /// The `/`-separated textual form used on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the path segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Resolve this path under a local root directory.
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in self.segments() {
            out.push(segment);
        }
        out
    }

    /// Whether this path points into the version archive directory.
    pub fn is_archive(&self) -> bool {
        self.segments().next() == Some(ARCHIVE_DIR)
    }
}

impl fmt::Display for SyncPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SyncPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
