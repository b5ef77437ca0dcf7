//! foldersync - Core types and constants.
//!
//! This module has no I/O of its own. It defines the protocol constants, the
//! [`SyncPath`] and [`VersionId`] types every other layer keys files by, and
//! the error types shared across layers.

mod change;
mod constants;
mod error;
mod path;
mod version;

pub use change::*;
pub use constants::*;
pub use error::*;
pub use path::*;
pub use version::*;
