//! Peer session.
//!
//! A [`PeerSession`] owns everything that outlives one connection: the
//! configuration, the version archive, the cached peer view and the baseline
//! snapshot of the watched folder. Each successful [`PeerSession::connect`]
//! yields a [`PeerConnection`] driving two tasks over the same socket:
//!
//! - the **receive loop** decodes relayed messages, replaces the peer view on
//!   status broadcasts and applies file changes locally
//! - the **watch loop** waits for local changes and sends each one to the
//!   relay with its full payload and a fresh version token
//!
//! Both directions run independently. When either loop ends the other is
//! stopped, and the folder baseline is handed back to the session so the next
//! connection picks up where this one left off.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::apply::Applier;
use super::config::PeerConfig;
use super::error::ClientError;
use super::peers::PeerView;
use crate::core::{ChangeAction, SyncPath, VersionId};
use crate::sync::{ChangeDetector, FolderWatcher, VersionArchive};
use crate::transport::{
    ChangeEvent, Frame, FrameReader, FrameWriter, FramedChannel, Message, PeerStatusMap,
    is_connection_fault,
};

/// Connection state of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected.
    Disconnected,
    /// Connection attempts in progress.
    Connecting,
    /// Connected and syncing.
    Connected,
    /// Connection shut down on request.
    Closed,
}

#[derive(Debug)]
struct Shared {
    config: PeerConfig,
    archive: Arc<VersionArchive>,
    applier: Arc<Applier>,
    peers: PeerView,
    state: RwLock<ClientState>,
    baseline: Mutex<Option<ChangeDetector>>,
}

impl Shared {
    async fn set_state(&self, state: ClientState) {
        *self.state.write().await = state;
    }

    fn take_baseline(&self) -> Option<ChangeDetector> {
        self.baseline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn put_baseline(&self, detector: ChangeDetector) {
        *self.baseline.lock().unwrap_or_else(PoisonError::into_inner) = Some(detector);
    }
}

/// A peer of the relay, mirroring one local folder.
///
/// # Example
///
/// ```ignore
/// use foldersync::client::{PeerConfigBuilder, PeerSession};
///
/// let config = PeerConfigBuilder::new()
///     .server_addr("127.0.0.1:5001".parse()?)
///     .sync_root("/home/me/Shared")
///     .build();
///
/// let session = PeerSession::new(config)?;
/// session.run().await;
/// ```
#[derive(Debug)]
pub struct PeerSession {
    shared: Arc<Shared>,
}

impl PeerSession {
    /// Create a session, reload the archive and take the initial snapshot.
    ///
    /// Files present now are the baseline and are not sent on connect.
    pub fn new(config: PeerConfig) -> Result<Self, ClientError> {
        let archive = Arc::new(VersionArchive::open(&config.sync_root)?);
        let applier = Arc::new(Applier::new(
            config.apply_root(),
            archive.clone(),
            config.applies_into_sync_root(),
        ));
        let detector = ChangeDetector::new(&config.sync_root);
        info!(
            "watching {} ({} files)",
            config.sync_root.display(),
            detector.snapshot().len()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                archive,
                applier,
                peers: PeerView::new(),
                state: RwLock::new(ClientState::Disconnected),
                baseline: Mutex::new(Some(detector)),
            }),
        })
    }

    /// The session configuration.
    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }

    /// The local version archive.
    pub fn archive(&self) -> Arc<VersionArchive> {
        self.shared.archive.clone()
    }

    /// Shared handle on the cached peer view.
    pub fn peers(&self) -> PeerView {
        self.shared.peers.clone()
    }

    /// Owned copy of the last liveness snapshot received.
    pub async fn peer_view(&self) -> PeerStatusMap {
        self.shared.peers.snapshot().await
    }

    /// Current connection state.
    pub async fn state(&self) -> ClientState {
        *self.shared.state.read().await
    }

    /// Connect to the relay and start the receive and watch loops.
    ///
    /// Refused, reset and aborted attempts are retried after the configured
    /// delay until one succeeds. Any other connect error is returned.
    pub async fn connect(&self) -> Result<PeerConnection, ClientError> {
        let config = &self.shared.config;
        self.shared.set_state(ClientState::Connecting).await;

        let stream = loop {
            match TcpStream::connect(config.server_addr).await {
                Ok(stream) => break stream,
                Err(e) if is_connection_fault(&e) => {
                    warn!(
                        "relay {} unreachable ({}), retrying in {:?}",
                        config.server_addr, e, config.retry_delay
                    );
                    tokio::time::sleep(config.retry_delay).await;
                }
                Err(e) => {
                    self.shared.set_state(ClientState::Disconnected).await;
                    return Err(ClientError::Connect(e));
                }
            }
        };

        let channel = match FramedChannel::from_stream_with_limit(stream, config.max_header_len) {
            Ok(channel) => channel,
            Err(e) => {
                self.shared.set_state(ClientState::Disconnected).await;
                return Err(ClientError::Connect(e));
            }
        };
        let local_addr = channel.local_addr();
        info!("connected to relay {} as {}", config.server_addr, local_addr);

        let detector = self
            .shared
            .take_baseline()
            .unwrap_or_else(|| ChangeDetector::new(&config.sync_root));
        let watcher = FolderWatcher::with_detector(detector, config.watch_mode, config.poll_interval);
        debug!("watch mode: {}", watcher.mode());

        let (reader, writer) = channel.into_split();
        let (stop_tx, stop_rx) = watch::channel(false);
        let receive = tokio::spawn(receive_loop(self.shared.clone(), reader, stop_rx.clone()));
        let watch = tokio::spawn(watch_loop(self.shared.clone(), writer, watcher, stop_rx));

        self.shared.set_state(ClientState::Connected).await;
        Ok(PeerConnection {
            local_addr,
            stop_tx,
            receive,
            watch,
            shared: self.shared.clone(),
        })
    }

    /// Stay connected for as long as the process runs.
    ///
    /// Connects, waits for the connection to end, and connects again after
    /// the retry delay. Messages in flight when a connection drops are lost.
    pub async fn run(&self) {
        loop {
            match self.connect().await {
                Ok(connection) => {
                    connection.closed().await;
                    warn!("connection to relay lost");
                }
                Err(e) => warn!("{}", e),
            }
            tokio::time::sleep(self.shared.config.retry_delay).await;
        }
    }
}

/// One live connection of a [`PeerSession`].
///
/// Dropping it stops both loops.
#[derive(Debug)]
pub struct PeerConnection {
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    receive: JoinHandle<()>,
    watch: JoinHandle<()>,
    shared: Arc<Shared>,
}

impl PeerConnection {
    /// Local address of the socket, which is this peer's identity at the
    /// relay.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait until either loop ends, then stop the other.
    pub async fn closed(self) {
        let PeerConnection {
            stop_tx,
            mut receive,
            mut watch,
            shared,
            ..
        } = self;

        tokio::select! {
            res = &mut receive => {
                log_join("receive", res);
                let _ = stop_tx.send(true);
                log_join("watch", watch.await);
            }
            res = &mut watch => {
                log_join("watch", res);
                let _ = stop_tx.send(true);
                log_join("receive", receive.await);
            }
        }
        shared.set_state(ClientState::Disconnected).await;
    }

    /// Stop both loops and wait for them.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        log_join("receive", self.receive.await);
        log_join("watch", self.watch.await);
        self.shared.set_state(ClientState::Closed).await;
        info!("disconnected from relay");
    }
}

fn log_join(name: &str, res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        warn!("{} loop failed: {}", name, e);
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    mut reader: FrameReader<OwnedReadHalf>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let result = tokio::select! {
            result = reader.read_frame() => result,
            _ = stop.changed() => break,
        };

        let frame = match result {
            Ok(frame) => frame,
            Err(e) if e.is_clean_close() => {
                info!("relay closed the connection");
                break;
            }
            Err(e) if e.is_connection_fault() => {
                info!("lost connection to relay: {}", e);
                break;
            }
            Err(e) if e.is_decode_fault() => {
                warn!("unreadable message from relay, dropping connection: {}", e);
                break;
            }
            Err(e) => {
                warn!("receive failed: {}", e);
                break;
            }
        };

        match Message::from(frame) {
            Message::Status(peers) => {
                trace!("peer status: {:?}", peers);
                shared.peers.replace(peers).await;
                trace!("{} peers online", shared.peers.online_count().await);
            }
            Message::Change(event) => {
                let applier = shared.applier.clone();
                let path = event.path.clone();
                match tokio::task::spawn_blocking(move || applier.apply(&event)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("{}: {}", path, e),
                    Err(e) => warn!("apply task for {} failed: {}", path, e),
                }
            }
        }
    }
}

async fn watch_loop(
    shared: Arc<Shared>,
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut watcher: FolderWatcher,
    mut stop: watch::Receiver<bool>,
) {
    'outer: loop {
        let changes = tokio::select! {
            changes = watcher.next_changes() => changes,
            _ = stop.changed() => break,
        };

        for (action, path) in changes.iter() {
            if shared.applier.is_echo(action, path) {
                trace!("{} {} was applied from the relay, not sending", action, path);
                continue;
            }

            let frame = match outbound_frame(&shared, action, path).await {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    warn!("not sending {} {}: {}", action, path, e);
                    continue;
                }
            };

            let sent = tokio::select! {
                sent = writer.write_frame(&frame) => sent,
                _ = stop.changed() => break 'outer,
            };
            if let Err(e) = sent {
                warn!("send failed: {}", e);
                break 'outer;
            }
            info!(
                "sent {} {} ({} bytes)",
                action,
                path,
                frame.payload().len()
            );
        }
    }

    shared.put_baseline(watcher.into_detector());
}

/// Build the message for one local change, archiving add and modify payloads
/// under a fresh version token. `None` when the file vanished before it could
/// be read.
async fn outbound_frame(
    shared: &Shared,
    action: ChangeAction,
    path: &SyncPath,
) -> Result<Option<Frame>, ClientError> {
    if action == ChangeAction::Delete {
        return Ok(Some(Frame::delete(path.clone())?));
    }

    let local = path.to_local(&shared.config.sync_root);
    let payload = match tokio::fs::read(&local).await {
        Ok(payload) => Bytes::from(payload),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} vanished before it could be sent", path);
            return Ok(None);
        }
        Err(source) => {
            return Err(ClientError::Read {
                path: local,
                source,
            });
        }
    };

    let version = VersionId::generate();
    let archive = shared.archive.clone();
    let (to_path, to_version, to_payload) = (path.clone(), version.clone(), payload.clone());
    let saved =
        tokio::task::spawn_blocking(move || archive.save(&to_path, &to_version, &to_payload))
            .await?;
    if let Err(e) = saved {
        warn!("failed to archive {}: {}", path, e);
    }

    let event = ChangeEvent {
        action,
        path: path.clone(),
        version: Some(version),
        payload,
    };
    Ok(Some(event.to_frame()?))
}
