//! # foldersync
//!
//! Keeps a folder mirrored across machines by relaying file changes through a
//! central server.
//!
//! Each peer watches its folder, and sends every added, modified or deleted
//! file to the relay. The relay forwards each message verbatim to all other
//! connected peers and periodically broadcasts which peers are online. Every
//! payload a peer sends or receives is kept in a per-file version archive
//! under `<folder>/.versions`.
//!
//! - **Change detection**: snapshot diffing, woken by filesystem
//!   notifications or a fixed poll interval
//! - **Wire format**: one JSON header line per message, followed by the raw
//!   file bytes for add and modify
//! - **Relay**: byte-for-byte fan-out, never echoed back to the sender
//! - **Delivery**: at most once; messages in flight during a disconnect are
//!   lost, and peers reconnect on their own
//!
//! ## Feature Flags
//!
//! - `transport` (default): Wire format and framed TCP channel
//! - `sync` (default): Scanner, change detection, watcher, version archive
//! - `client` (default): Peer session (requires `transport` and `sync`)
//! - `server` (default): Relay server (requires `transport`)
//!
//! ## Modules
//!
//! - [`core`]: Constants, path and version types, errors (always included)
//! - [`transport`]: Wire format (requires `transport` feature)
//! - [`sync`]: Local folder handling (requires `sync` feature)
//! - [`client`]: Peer session (requires `client` feature)
//! - [`server`]: Relay server (requires `server` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use foldersync::prelude::*;
//!
//! let path = SyncPath::new("docs/notes.txt").unwrap();
//! assert_eq!(path.segments().count(), 2);
//! assert!(SyncPath::new("../etc/passwd").is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Sync layer (feature-gated)
#[cfg(feature = "sync")]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub mod sync;

// Peer API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Relay API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        ChangeEvent, Frame, FrameError, FramedChannel, Header, Message, PeerState, PeerStatusMap,
        TransportError, TransportResult,
    };

    #[cfg(feature = "sync")]
    pub use crate::sync::{ArchiveError, ChangeSet, Snapshot, VersionArchive, WatchMode};

    #[cfg(feature = "client")]
    pub use crate::client::{ClientError, PeerConfig, PeerConfigBuilder, PeerSession};

    #[cfg(feature = "server")]
    pub use crate::server::{RelayConfig, RelayConfigBuilder, RelayServer, ServerError};
}

// Re-export commonly used items at crate root
pub use crate::core::{FolderSyncError, SyncPath, VersionId};

#[cfg(feature = "client")]
pub use client::PeerSession;

#[cfg(feature = "server")]
pub use server::RelayServer;
