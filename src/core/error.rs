//! Error types for foldersync.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised when a path cannot be used as a [`SyncPath`](super::SyncPath).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path has no usable component.
    #[error("empty path")]
    Empty,

    /// The path is absolute or carries a drive prefix.
    #[error("absolute path not allowed: {0}")]
    Absolute(String),

    /// The path contains a `..` component.
    #[error("path escapes the sync root: {0}")]
    Traversal(String),

    /// A component contains a forbidden character.
    #[error("invalid path component in {0:?}")]
    InvalidComponent(String),

    /// A local path is not located under the sync root.
    #[error("{} is outside the sync root", .0.display())]
    OutsideRoot(PathBuf),

    /// A local path is not valid UTF-8 and cannot be sent on the wire.
    #[error("{} is not valid UTF-8", .0.display())]
    NonUtf8(PathBuf),
}

/// Errors raised when a version token is not usable as an archive key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The token is empty.
    #[error("empty version token")]
    Empty,

    /// The token exceeds the length limit.
    #[error("version token too long: {len} bytes (limit {limit})")]
    TooLong {
        /// Actual token length.
        len: usize,
        /// Maximum accepted length.
        limit: usize,
    },

    /// The token is `.` or `..`.
    #[error("reserved version token: {0:?}")]
    Reserved(String),

    /// The token contains a character outside `[A-Za-z0-9._-]`.
    #[error("version token contains an invalid character: {0:?}")]
    InvalidCharacter(String),
}

/// Top-level foldersync errors.
#[derive(Debug, Error)]
pub enum FolderSyncError {
    /// Path validation error.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Version token error.
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// Transport error (framing or socket).
    #[cfg(feature = "transport")]
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// Version archive error.
    #[cfg(feature = "sync")]
    #[error("archive error: {0}")]
    Archive(#[from] crate::sync::ArchiveError),

    /// Peer session error.
    #[cfg(feature = "client")]
    #[error("client error: {0}")]
    Client(#[from] crate::client::ClientError),

    /// Relay server error.
    #[cfg(feature = "server")]
    #[error("server error: {0}")]
    Server(#[from] crate::server::ServerError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
