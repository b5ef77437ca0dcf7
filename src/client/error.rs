//! Peer session errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::sync::ArchiveError;
use crate::transport::{FrameError, TransportError};

/// Errors that can occur in a peer session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connecting to the relay failed with something other than a refused,
    /// reset or aborted connection.
    #[error("connection failed: {0}")]
    Connect(#[source] io::Error),

    /// Sending or receiving failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An outbound message could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Writing or removing a received file failed.
    #[error("failed to apply change to {}: {source}", path.display())]
    Apply {
        /// Local file being changed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Reading a local file for sending failed.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// Local file being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The version archive failed.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
