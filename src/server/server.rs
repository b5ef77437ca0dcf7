//! Relay server.
//!
//! The relay accepts any number of peers, forwards every file-change message
//! it reads from one peer to all other active peers byte for byte, and
//! periodically tells everyone which endpoints are online.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

use super::session::{Registry, SessionId};
use crate::core::{DEFAULT_MAX_HEADER_LEN, DEFAULT_PORT, STATUS_INTERVAL};
use crate::transport::{Frame, FramedChannel, PeerStatusMap};

/// Errors that can occur in the relay server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("bind to {addr} failed: {source}")]
    BindFailed {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,

    /// Interval between two status broadcasts.
    pub status_interval: Duration,

    /// Upper bound on one inbound header line.
    pub max_header_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            status_interval: STATUS_INTERVAL,
            max_header_len: DEFAULT_MAX_HEADER_LEN,
        }
    }
}

/// Builder for a [`RelayConfig`].
#[derive(Debug)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the status broadcast interval.
    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.config.status_interval = interval;
        self
    }

    /// Set the inbound header limit.
    pub fn max_header_len(mut self, len: usize) -> Self {
        self.config.max_header_len = len;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RelayConfig {
        self.config
    }
}

impl Default for RelayConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type SharedRegistry = Arc<RwLock<Registry>>;

/// A running relay.
///
/// # Example
///
/// ```ignore
/// use foldersync::server::{RelayConfigBuilder, RelayServer};
///
/// let config = RelayConfigBuilder::new()
///     .bind_addr("0.0.0.0:5001".parse()?)
///     .build();
///
/// let server = RelayServer::bind(config).await?;
/// tokio::signal::ctrl_c().await?;
/// server.shutdown().await;
/// ```
#[derive(Debug)]
pub struct RelayServer {
    config: RelayConfig,
    registry: SharedRegistry,
    local_addr: SocketAddr,
    shutdown_tx: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RelayServer {
    /// Bind and start accepting peers and broadcasting status.
    pub async fn bind(config: RelayConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("relay listening on {}", local_addr);

        let registry: SharedRegistry = Arc::new(RwLock::new(Registry::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(accept_loop(
                listener,
                registry.clone(),
                config.max_header_len,
                shutdown_rx.clone(),
            )),
            tokio::spawn(status_loop(
                registry.clone(),
                config.status_interval,
                shutdown_rx,
            )),
        ];

        Ok(Self {
            config,
            registry,
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            tasks,
        })
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the server configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Owned copy of the current status map.
    pub async fn statuses(&self) -> PeerStatusMap {
        self.registry.read().await.statuses()
    }

    /// Number of sessions ever accepted, closed ones included.
    pub async fn session_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Number of currently connected peers.
    pub async fn active_count(&self) -> usize {
        self.registry.read().await.active_count()
    }

    /// Stop accepting, stop broadcasting and close every connection.
    ///
    /// The listening socket and every peer socket are closed before this
    /// returns.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("relay task failed: {}", e);
            }
        }
        info!("relay on {} shut down", self.local_addr);
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: SharedRegistry,
    max_header_len: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut handlers = JoinSet::new();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            Some(finished) = handlers.join_next(), if !handlers.is_empty() => {
                log_handler_exit(finished);
                continue;
            }
            _ = shutdown.changed() => break,
        };

        match accepted {
            Ok((stream, addr)) => {
                handlers.spawn(handle_connection(
                    stream,
                    addr,
                    registry.clone(),
                    max_header_len,
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                // Usually fd exhaustion; back off instead of spinning.
                error!("accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    drop(listener);

    // Handlers see the same signal; wait until every socket is closed.
    while let Some(finished) = handlers.join_next().await {
        log_handler_exit(finished);
    }
    debug!("accept loop stopped");
}

fn log_handler_exit(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        warn!("connection handler failed: {}", e);
    }
}

async fn status_loop(
    registry: SharedRegistry,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }

        let mut sessions = registry.write().await;
        let statuses = sessions.statuses();
        let frame = match Frame::status(statuses) {
            Ok(frame) => frame,
            Err(e) => {
                error!("cannot encode status broadcast: {}", e);
                continue;
            }
        };
        let delivered = sessions.broadcast(frame.wire());
        trace!("status broadcast to {} peers", delivered);
    }
    debug!("status loop stopped");
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: SharedRegistry,
    max_header_len: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let channel = match FramedChannel::from_stream_with_limit(stream, max_header_len) {
        Ok(channel) => channel,
        Err(e) => {
            warn!("dropping connection from {}: {}", addr, e);
            return;
        }
    };
    let (mut reader, mut writer) = channel.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let id = registry.write().await.open(addr, tx);
    info!("peer {} connected (session {})", addr, id);

    let writer_task = tokio::spawn(async move {
        while let Some(wire) = rx.recv().await {
            if let Err(e) = writer.write_raw(&wire).await {
                debug!("write to {} failed: {}", addr, e);
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    let mut stopping = false;
    loop {
        let result = tokio::select! {
            result = reader.read_frame() => result,
            _ = shutdown.changed() => {
                stopping = true;
                break;
            }
        };

        match result {
            Ok(frame) => relay(&registry, id, addr, frame).await,
            Err(e) if e.is_clean_close() => {
                info!("peer {} disconnected", addr);
                break;
            }
            Err(e) if e.is_connection_fault() => {
                info!("peer {} lost: {}", addr, e);
                break;
            }
            Err(e) if e.is_decode_fault() => {
                warn!("peer {} sent an unreadable message: {}", addr, e);
                break;
            }
            Err(e) => {
                warn!("peer {} dropped: {}", addr, e);
                break;
            }
        }
    }

    // Closing drops the queue sender, so the writer drains and exits.
    {
        let mut sessions = registry.write().await;
        sessions.close(id);
        if let Some(session) = sessions.get(id) {
            debug!(
                "session {} closed after {:?}, {} messages relayed",
                id,
                session.age(),
                session.relayed()
            );
        }
    }
    if stopping {
        // A peer that stopped reading must not hold up shutdown.
        writer_task.abort();
    }
    match writer_task.await {
        Err(e) if !e.is_cancelled() => warn!("writer for {} failed: {}", addr, e),
        _ => {}
    }
}

async fn relay(registry: &SharedRegistry, id: SessionId, addr: SocketAddr, frame: Frame) {
    if frame.header().is_status() {
        debug!("ignoring status message from peer {}", addr);
        return;
    }
    let delivered = registry.write().await.broadcast_from(id, frame.wire());
    debug!(
        "relayed {} bytes from {} to {} peers",
        frame.wire_len(),
        addr,
        delivered
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SyncPath, VersionId};
    use crate::transport::PeerState;

    fn local_config() -> RelayConfig {
        RelayConfigBuilder::new()
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .status_interval(Duration::from_millis(100))
            .build()
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:5001");
        assert_eq!(config.status_interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_relay_skips_sender() {
        let server = RelayServer::bind(local_config()).await.unwrap();
        let addr = server.local_addr();

        let mut a = FramedChannel::connect(addr).await.unwrap();
        let mut b = FramedChannel::connect(addr).await.unwrap();
        while server.active_count().await < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let frame = Frame::add(
            SyncPath::new("notes.txt").unwrap(),
            VersionId::parse("v1").unwrap(),
            b"hello",
        )
        .unwrap();
        a.send(&frame).await.unwrap();

        // b gets the change (possibly after a status broadcast); a never does.
        let received = loop {
            let next = b.recv().await.unwrap();
            if !next.header().is_status() {
                break next;
            }
        };
        assert_eq!(received.wire(), frame.wire());

        let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
        while let Ok(Ok(next)) = tokio::time::timeout_at(deadline, a.recv()).await {
            assert!(next.header().is_status());
        }

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_peer_sockets() {
        let config = RelayConfigBuilder::new()
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .status_interval(Duration::from_secs(60))
            .build();
        let server = RelayServer::bind(config).await.unwrap();
        let addr = server.local_addr();

        let mut a = FramedChannel::connect(addr).await.unwrap();
        let mut b = FramedChannel::connect(addr).await.unwrap();
        while server.active_count().await < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        server.shutdown().await;

        // The relay side is already gone, so both reads end right away.
        for channel in [&mut a, &mut b] {
            let read = tokio::time::timeout(Duration::from_millis(200), channel.recv()).await;
            assert!(matches!(read, Ok(Err(e)) if e.is_clean_close()));
        }
        assert!(FramedChannel::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_marks_offline() {
        let server = RelayServer::bind(local_config()).await.unwrap();
        let addr = server.local_addr();

        let a = FramedChannel::connect(addr).await.unwrap();
        let a_identity = a.local_addr().to_string();
        let mut b = FramedChannel::connect(addr).await.unwrap();
        while server.active_count().await < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.statuses().await[&a_identity], PeerState::Online);

        drop(a);
        while server.active_count().await > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.session_count().await, 2);
        assert_eq!(server.statuses().await[&a_identity], PeerState::Offline);

        // The next status broadcast still names the departed peer.
        let peers = loop {
            let next = b.recv().await.unwrap();
            if let crate::transport::Header::Status(peers) = next.header() {
                if peers.get(&a_identity) == Some(&PeerState::Offline) {
                    break peers.clone();
                }
            }
        };
        assert_eq!(peers[&b.local_addr().to_string()], PeerState::Online);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_input_ends_only_that_session() {
        let server = RelayServer::bind(local_config()).await.unwrap();
        let addr = server.local_addr();

        let mut bad = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut good = FramedChannel::connect(addr).await.unwrap();
        while server.active_count().await < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::io::AsyncWriteExt::write_all(&mut bad, b"not json\n")
            .await
            .unwrap();
        while server.active_count().await > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // The relay still serves the remaining peer.
        let next = good.recv().await.unwrap();
        assert!(next.header().is_status());
        server.shutdown().await;
    }
}
