//! Peer configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{DEFAULT_MAX_HEADER_LEN, DEFAULT_PORT, POLL_INTERVAL, RETRY_DELAY};
use crate::sync::WatchMode;

/// Peer configuration.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Relay address to connect to.
    pub server_addr: SocketAddr,

    /// Folder that is watched and holds the version archive.
    pub sync_root: PathBuf,

    /// Folder that received changes are written into. `None` means
    /// `sync_root`.
    pub apply_root: Option<PathBuf>,

    /// Interval between two scans when polling.
    pub poll_interval: Duration,

    /// Delay between two connection attempts.
    pub retry_delay: Duration,

    /// How the sync root is watched.
    pub watch_mode: WatchMode,

    /// Upper bound on one inbound header line.
    pub max_header_len: usize,
}

impl PeerConfig {
    /// Folder that received changes are written into.
    pub fn apply_root(&self) -> &Path {
        self.apply_root.as_deref().unwrap_or(&self.sync_root)
    }

    /// Whether received changes land in the watched folder.
    pub fn applies_into_sync_root(&self) -> bool {
        self.apply_root().as_os_str() == self.sync_root.as_os_str()
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            sync_root: PathBuf::from("."),
            apply_root: None,
            poll_interval: POLL_INTERVAL,
            retry_delay: RETRY_DELAY,
            watch_mode: WatchMode::default(),
            max_header_len: DEFAULT_MAX_HEADER_LEN,
        }
    }
}

/// Builder for a [`PeerConfig`].
#[derive(Debug)]
pub struct PeerConfigBuilder {
    config: PeerConfig,
}

impl PeerConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: PeerConfig::default(),
        }
    }

    /// Set the relay address.
    pub fn server_addr(mut self, addr: SocketAddr) -> Self {
        self.config.server_addr = addr;
        self
    }

    /// Set the watched folder.
    pub fn sync_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.sync_root = root.into();
        self
    }

    /// Write received changes into a different folder.
    pub fn apply_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.apply_root = Some(root.into());
        self
    }

    /// Set the polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the reconnect delay.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Set the watch mode.
    pub fn watch_mode(mut self, mode: WatchMode) -> Self {
        self.config.watch_mode = mode;
        self
    }

    /// Set the inbound header limit.
    pub fn max_header_len(mut self, len: usize) -> Self {
        self.config.max_header_len = len;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PeerConfig {
        self.config
    }
}

impl Default for PeerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
