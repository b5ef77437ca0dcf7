//! Cached view of peer liveness.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::transport::{PeerState, PeerStatusMap};

/// Last liveness snapshot received from the relay.
///
/// Written only by the receive loop. Readers get owned copies.
#[derive(Debug, Clone, Default)]
pub struct PeerView {
    inner: Arc<RwLock<PeerStatusMap>>,
}

impl PeerView {
    /// An empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole view with a new snapshot.
    pub async fn replace(&self, peers: PeerStatusMap) {
        *self.inner.write().await = peers;
    }

    /// Owned copy of the current view.
    pub async fn snapshot(&self) -> PeerStatusMap {
        self.inner.read().await.clone()
    }

    /// State of one endpoint.
    pub async fn get(&self, identity: &str) -> Option<PeerState> {
        self.inner.read().await.get(identity).copied()
    }

    /// Number of endpoints currently online.
    pub async fn online_count(&self) -> usize {
        self.inner
            .read()
            .await
            .values()
            .filter(|state| **state == PeerState::Online)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_does_not_merge() {
        let view = PeerView::new();
        let mut first = PeerStatusMap::new();
        first.insert("a:1".into(), PeerState::Online);
        first.insert("b:2".into(), PeerState::Online);
        view.replace(first).await;
        assert_eq!(view.online_count().await, 2);

        let mut second = PeerStatusMap::new();
        second.insert("c:3".into(), PeerState::Offline);
        view.replace(second.clone()).await;

        assert_eq!(view.snapshot().await, second);
        assert_eq!(view.get("a:1").await, None);
        assert_eq!(view.get("c:3").await, Some(PeerState::Offline));
        assert_eq!(view.online_count().await, 0);
    }
}
