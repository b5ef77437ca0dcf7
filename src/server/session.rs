//! Relay-side sessions and the session registry.
//!
//! One [`Session`] per accepted connection. Sessions are never removed: a
//! closed session keeps its entry so status broadcasts keep reporting the
//! endpoint as offline.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::transport::{PeerState, PeerStatusMap};

/// Identifier of one accepted connection, unique for the relay's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection is open and receives broadcasts.
    Active,
    /// Connection has ended.
    Closed,
}

/// Queue feeding one session's socket writer.
pub type Outbound = mpsc::UnboundedSender<Bytes>;

/// Per-connection entry in the registry.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    state: SessionState,
    outbound: Option<Outbound>,
    connected_at: Instant,
    relayed: u64,
}

impl Session {
    fn new(id: SessionId, peer_addr: SocketAddr, outbound: Outbound) -> Self {
        Self {
            id,
            peer_addr,
            state: SessionState::Active,
            outbound: Some(outbound),
            connected_at: Instant::now(),
            relayed: 0,
        }
    }

    /// Get the session ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Endpoint identity reported in status broadcasts.
    pub fn identity(&self) -> String {
        self.peer_addr.to_string()
    }

    /// Get the session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Liveness as reported to peers.
    pub fn peer_state(&self) -> PeerState {
        match self.state {
            SessionState::Active => PeerState::Online,
            SessionState::Closed => PeerState::Offline,
        }
    }

    /// Check if session is active.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Number of messages this session sent that were relayed.
    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    /// Get session age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Queue bytes for this session. Returns `false` when the session can no
    /// longer be written to.
    fn send(&self, wire: &Bytes) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(wire.clone()).is_ok(),
            None => false,
        }
    }

    /// Mark closed and drop the outbound queue.
    fn close(&mut self) {
        self.state = SessionState::Closed;
        self.outbound = None;
    }
}

/// All sessions the relay has accepted.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: HashMap<SessionId, Session>,
    next_id: u64,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active session.
    pub fn open(&mut self, peer_addr: SocketAddr, outbound: Outbound) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        self.sessions.insert(id, Session::new(id, peer_addr, outbound));
        id
    }

    /// Mark a session offline. The entry is kept.
    pub fn close(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.close();
        }
    }

    /// Look up a session.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Queue `wire` for every active session except `origin`.
    ///
    /// A session whose queue is gone is closed and skipped; delivery to the
    /// others continues. Returns the number of sessions the bytes were queued
    /// for.
    pub fn broadcast_from(&mut self, origin: SessionId, wire: &Bytes) -> usize {
        if let Some(session) = self.sessions.get_mut(&origin) {
            session.relayed += 1;
        }
        self.deliver(Some(origin), wire)
    }

    /// Queue `wire` for every active session.
    pub fn broadcast(&mut self, wire: &Bytes) -> usize {
        self.deliver(None, wire)
    }

    fn deliver(&mut self, skip: Option<SessionId>, wire: &Bytes) -> usize {
        let mut delivered = 0;
        for session in self.sessions.values_mut() {
            if Some(session.id) == skip || !session.is_active() {
                continue;
            }
            if session.send(wire) {
                delivered += 1;
            } else {
                debug!("session {} ({}) unwritable, closing", session.id, session.peer_addr);
                session.close();
            }
        }
        delivered
    }

    /// Liveness of every endpoint ever seen.
    ///
    /// An endpoint with several sessions is online when any of them is.
    pub fn statuses(&self) -> PeerStatusMap {
        let mut peers = PeerStatusMap::new();
        for session in self.sessions.values() {
            let state = session.peer_state();
            peers
                .entry(session.identity())
                .and_modify(|known| {
                    if state == PeerState::Online {
                        *known = PeerState::Online;
                    }
                })
                .or_insert(state);
        }
        peers
    }

    /// Number of sessions ever accepted.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session was ever accepted.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of currently active sessions.
    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn test_broadcast_skips_origin() {
        let mut registry = Registry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();
        let a = registry.open(addr(1), tx_a);
        registry.open(addr(2), tx_b);
        registry.open(addr(3), tx_c);

        let wire = Bytes::from_static(b"{\"action\":\"delete\",\"path\":\"x\"}\n");
        assert_eq!(registry.broadcast_from(a, &wire), 2);

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), wire);
        assert_eq!(rx_c.try_recv().unwrap(), wire);
        assert_eq!(registry.get(a).unwrap().relayed(), 1);
    }

    #[test]
    fn test_closed_session_kept_offline() {
        let mut registry = Registry::new();
        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let a = registry.open(addr(1), tx_a);
        registry.open(addr(2), tx_b);

        registry.close(a);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_count(), 1);

        let statuses = registry.statuses();
        assert_eq!(statuses["10.0.0.1:1"], PeerState::Offline);
        assert_eq!(statuses["10.0.0.1:2"], PeerState::Online);
    }

    #[test]
    fn test_failed_delivery_closes_session() {
        let mut registry = Registry::new();
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = registry.open(addr(1), tx_a);
        let b = registry.open(addr(2), tx_b);
        drop(rx_a);

        let wire = Bytes::from_static(b"x");
        assert_eq!(registry.broadcast(&wire), 1);
        assert_eq!(rx_b.try_recv().unwrap(), wire);
        assert_eq!(registry.get(a).unwrap().state(), SessionState::Closed);
        assert!(registry.get(b).unwrap().is_active());
    }

    #[test]
    fn test_reused_identity_online_wins() {
        let mut registry = Registry::new();
        let (tx_old, _rx_old) = mpsc::unbounded_channel();
        let (tx_new, _rx_new) = mpsc::unbounded_channel();
        let old = registry.open(addr(7), tx_old);
        registry.close(old);
        registry.open(addr(7), tx_new);

        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses["10.0.0.1:7"], PeerState::Online);
    }

    #[test]
    fn test_session_id_display() {
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.open(addr(1), tx);
        assert_eq!(id.to_string(), "#1");
    }
}
