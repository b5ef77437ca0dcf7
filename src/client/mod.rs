//! foldersync - Peer side.
//!
//! A peer watches one local folder, sends every change to the relay and
//! applies the changes the relay forwards from other peers.
//!
//! ```text
//!   local folder ──► FolderWatcher ──► watch loop ──┐
//!                                                   ├──► relay socket
//!   local folder ◄── Applier ◄────── receive loop ◄─┘
//!                      │
//!                      └──► VersionArchive
//! ```

mod apply;
mod config;
mod error;
mod peers;
mod session;

pub use apply::*;
pub use config::*;
pub use error::*;
pub use peers::*;
pub use session::*;
