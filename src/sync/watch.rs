//! Folder watching.
//!
//! A [`FolderWatcher`] turns a [`ChangeDetector`] into an async source of
//! [`ChangeSet`]s. In [`WatchMode::Poll`] it rescans on a fixed interval. In
//! [`WatchMode::Notify`] platform filesystem events only wake it up; the
//! actual changes still come from a rescan and diff, so both modes report the
//! same events for the same edits.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use super::detector::{ChangeDetector, ChangeSet};
use super::snapshot::Snapshot;
use crate::core::{ARCHIVE_DIR, NOTIFY_RESCAN_INTERVAL, NOTIFY_SETTLE};

/// How a folder is watched for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchMode {
    /// Filesystem notifications trigger a rescan; falls back to polling when
    /// the platform watcher cannot be started.
    #[default]
    Notify,
    /// Rescan on a fixed interval.
    Poll,
}

impl WatchMode {
    /// Name used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            WatchMode::Notify => "notify",
            WatchMode::Poll => "poll",
        }
    }
}

impl fmt::Display for WatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "notify" => Ok(WatchMode::Notify),
            "poll" => Ok(WatchMode::Poll),
            other => Err(format!("unknown watch mode '{other}' (expected notify or poll)")),
        }
    }
}

enum Trigger {
    Poll(Interval),
    Notify {
        _watcher: RecommendedWatcher,
        events: mpsc::UnboundedReceiver<()>,
        rescan: Interval,
    },
}

impl Trigger {
    fn poll(period: Duration) -> Self {
        Trigger::Poll(delayed_interval(period))
    }

    fn notify(root: &Path) -> notify::Result<Self> {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let archive = root.join(ARCHIVE_DIR);
        let (tx, events) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    if !event.paths.is_empty()
                        && event.paths.iter().all(|p| p.starts_with(&archive))
                    {
                        return;
                    }
                    trace!("filesystem event: {:?}", event.kind);
                    let _ = tx.send(());
                }
                Err(e) => warn!("filesystem watcher error: {}", e),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok(Trigger::Notify {
            _watcher: watcher,
            events,
            rescan: delayed_interval(NOTIFY_RESCAN_INTERVAL),
        })
    }
}

/// First tick one full period from now, not immediately.
fn delayed_interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Async source of folder changes.
pub struct FolderWatcher {
    detector: ChangeDetector,
    trigger: Trigger,
    mode: WatchMode,
    poll_interval: Duration,
}

impl FolderWatcher {
    /// Watch `root`, taking the baseline snapshot now.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(root: impl Into<PathBuf>, mode: WatchMode, poll_interval: Duration) -> Self {
        Self::with_detector(ChangeDetector::new(root), mode, poll_interval)
    }

    /// Watch the folder of an existing detector, keeping its baseline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_detector(detector: ChangeDetector, mode: WatchMode, poll_interval: Duration) -> Self {
        let (trigger, mode) = match mode {
            WatchMode::Poll => (Trigger::poll(poll_interval), WatchMode::Poll),
            WatchMode::Notify => match Trigger::notify(detector.scanner().root()) {
                Ok(trigger) => {
                    debug!(
                        "watching {} with filesystem notifications",
                        detector.scanner().root().display()
                    );
                    (trigger, WatchMode::Notify)
                }
                Err(e) => {
                    warn!(
                        "filesystem notifications unavailable ({}), polling every {:?}",
                        e, poll_interval
                    );
                    (Trigger::poll(poll_interval), WatchMode::Poll)
                }
            },
        };

        Self {
            detector,
            trigger,
            mode,
            poll_interval,
        }
    }

    /// The mode actually in effect.
    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    /// The current baseline snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        self.detector.snapshot()
    }

    /// Give back the detector, keeping the baseline for a later watcher.
    pub fn into_detector(self) -> ChangeDetector {
        self.detector
    }

    /// Wait until the folder differs from the baseline and return the diff.
    pub async fn next_changes(&mut self) -> ChangeSet {
        loop {
            self.wait().await;
            let changes = self.rescan().await;
            if !changes.is_empty() {
                return changes;
            }
        }
    }

    async fn wait(&mut self) {
        let watcher_gone = match &mut self.trigger {
            Trigger::Poll(interval) => {
                interval.tick().await;
                false
            }
            Trigger::Notify { events, rescan, .. } => {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(()) => {
                            tokio::time::sleep(NOTIFY_SETTLE).await;
                            while events.try_recv().is_ok() {}
                            false
                        }
                        None => true,
                    },
                    _ = rescan.tick() => false,
                }
            }
        };

        if watcher_gone {
            warn!(
                "filesystem watcher stopped, polling every {:?}",
                self.poll_interval
            );
            self.trigger = Trigger::poll(self.poll_interval);
            self.mode = WatchMode::Poll;
        }
    }

    async fn rescan(&mut self) -> ChangeSet {
        let scanner = self.detector.scanner().clone();
        match tokio::task::spawn_blocking(move || scanner.scan()).await {
            Ok(next) => self.detector.advance(next),
            Err(e) => {
                warn!("folder scan failed: {}", e);
                ChangeSet::default()
            }
        }
    }
}

impl fmt::Debug for FolderWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolderWatcher")
            .field("root", &self.detector.scanner().root())
            .field("mode", &self.mode)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SyncPath;
    use std::fs;

    #[test]
    fn test_watch_mode_parse() {
        assert_eq!("notify".parse::<WatchMode>().unwrap(), WatchMode::Notify);
        assert_eq!("POLL".parse::<WatchMode>().unwrap(), WatchMode::Poll);
        assert!("inotify".parse::<WatchMode>().is_err());
        assert_eq!(WatchMode::default(), WatchMode::Notify);
    }

    #[tokio::test]
    async fn test_poll_reports_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher =
            FolderWatcher::new(dir.path(), WatchMode::Poll, Duration::from_millis(20));
        assert_eq!(watcher.mode(), WatchMode::Poll);

        fs::write(dir.path().join("fresh.txt"), b"hi").unwrap();
        let changes = tokio::time::timeout(Duration::from_secs(5), watcher.next_changes())
            .await
            .unwrap();
        assert!(changes.added.contains(&SyncPath::new("fresh.txt").unwrap()));
    }

    #[tokio::test]
    async fn test_notify_reports_deleted_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("doomed.txt"), b"bye").unwrap();
        let mut watcher =
            FolderWatcher::new(dir.path(), WatchMode::Notify, Duration::from_millis(20));

        fs::remove_file(dir.path().join("doomed.txt")).unwrap();
        let changes = tokio::time::timeout(Duration::from_secs(40), watcher.next_changes())
            .await
            .unwrap();
        assert!(changes.deleted.contains(&SyncPath::new("doomed.txt").unwrap()));
    }

    #[tokio::test]
    async fn test_detector_baseline_survives() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = FolderWatcher::new(dir.path(), WatchMode::Poll, Duration::from_millis(20));
        let detector = watcher.into_detector();

        fs::write(dir.path().join("offline.txt"), b"x").unwrap();
        let mut watcher =
            FolderWatcher::with_detector(detector, WatchMode::Poll, Duration::from_millis(20));
        let changes = tokio::time::timeout(Duration::from_secs(5), watcher.next_changes())
            .await
            .unwrap();
        assert!(changes.added.contains(&SyncPath::new("offline.txt").unwrap()));
    }
}
