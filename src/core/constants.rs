//! Protocol constants for foldersync.
//!
//! Wire limits are shared by both ends of a connection and MUST NOT be changed
//! independently. Timing values are defaults; sessions may override them
//! through their configuration builders.

use std::time::Duration;

// =============================================================================
// NETWORK DEFAULTS
// =============================================================================

/// Default relay port.
pub const DEFAULT_PORT: u16 = 5001;

/// Default host a peer connects to.
pub const DEFAULT_CLIENT_HOST: &str = "127.0.0.1";

/// Default host the relay binds to.
pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";

// =============================================================================
// TIMING
// =============================================================================

/// Interval between two snapshot scans of the watched folder.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Delay between two connection attempts after a refusal, reset or abort.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Interval between two liveness snapshots broadcast by the relay.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Quiet period after a filesystem notification before rescanning, so that a
/// burst of writes to one file is picked up by a single diff.
pub const NOTIFY_SETTLE: Duration = Duration::from_millis(200);

/// Interval of the safety-net rescan while filesystem notifications are in
/// use, for changes the platform watcher missed.
pub const NOTIFY_RESCAN_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// WIRE LIMITS
// =============================================================================

/// Byte that terminates every header line.
pub const HEADER_TERMINATOR: u8 = b'\n';

/// Default upper bound on a single header line, terminator included.
pub const DEFAULT_MAX_HEADER_LEN: usize = 64 * 1024;

/// Upper bound on a single file payload (1 GiB).
pub const MAX_PAYLOAD_SIZE: u64 = 1 << 30;

/// Upper bound on the textual length of a version token.
pub const MAX_VERSION_TOKEN_LEN: usize = 128;

// =============================================================================
// VERSION ARCHIVE
// =============================================================================

/// Name of the archive directory kept at the top of every sync root.
///
/// The scanner never descends into it.
pub const ARCHIVE_DIR: &str = ".versions";

/// Suffix appended to every archived payload file.
pub const VERSION_FILE_SUFFIX: &str = "version";
