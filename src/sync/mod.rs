//! foldersync - Sync Layer
//!
//! Everything a peer does with its local folder, independent of the network:
//!
//! - **Snapshots**: [`Scanner`] walks a sync root into a [`Snapshot`] of
//!   modification times
//! - **Change detection**: [`diff`] and [`ChangeDetector`] turn two snapshots
//!   into a [`ChangeSet`]
//! - **Watching**: [`FolderWatcher`] yields change sets as the folder changes,
//!   by polling or by filesystem notification
//! - **Version archive**: [`VersionArchive`] keeps every payload a peer sends
//!   or applies, keyed by path and version token

mod archive;
mod detector;
mod snapshot;
mod watch;

pub use archive::*;
pub use detector::*;
pub use snapshot::*;
pub use watch::*;
