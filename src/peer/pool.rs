use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::task::{Id, JoinSet};
use tracing::{debug, info};

use crate::peer::session::{PeerSession, SessionConfig, SessionStats};
use crate::state::SharedTorrent;

/// Outcome of one peer worker.
#[derive(Debug)]
pub struct SessionReport {
    pub peer: String,
    /// Session statistics, or the session's last error.
    pub outcome: Result<SessionStats, String>,
}

/// Runs one [`PeerSession`] per peer address as independent tokio tasks,
/// all downloading into the same [`SharedTorrent`].
pub struct SessionPool {
    torrent: Arc<SharedTorrent>,
    peer_id: [u8; 20],
    config: SessionConfig,
    tasks: JoinSet<SessionReport>,
    peers: HashMap<Id, String>,
}

impl SessionPool {
    pub fn new(torrent: Arc<SharedTorrent>, peer_id: [u8; 20], config: SessionConfig) -> Self {
        Self {
            torrent,
            peer_id,
            config,
            tasks: JoinSet::new(),
            peers: HashMap::new(),
        }
    }

    /// Starts a worker for `peer` (`host:port`).
    pub fn spawn(&mut self, peer: impl Into<String>) {
        let peer = peer.into();
        let mut session =
            PeerSession::new(Arc::clone(&self.torrent), self.peer_id).with_config(self.config.clone());

        let target = peer.clone();
        self.spawn_worker(peer, async move {
            session
                .download(&target)
                .await
                .map_err(|_| session.last_error().unwrap_or_default().to_string())
        });
    }

    fn spawn_worker<F>(&mut self, peer: String, worker: F)
    where
        F: Future<Output = Result<SessionStats, String>> + Send + 'static,
    {
        debug!(peer = %peer, "spawning peer worker");
        let name = peer.clone();
        let handle = self.tasks.spawn(async move {
            SessionReport {
                peer: name,
                outcome: worker.await,
            }
        });
        self.peers.insert(handle.id(), peer);
    }

    /// Number of workers not yet collected.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for the next worker to finish. Aborted workers are skipped.
    pub async fn join_next(&mut self) -> Option<SessionReport> {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            match joined {
                Ok((id, report)) => {
                    self.peers.remove(&id);
                    return Some(report);
                }
                Err(e) => {
                    let peer = self.peers.remove(&e.id()).unwrap_or_default();
                    if e.is_cancelled() {
                        continue;
                    }
                    return Some(SessionReport {
                        peer,
                        outcome: Err(format!("peer worker panicked: {e}")),
                    });
                }
            }
        }
        None
    }

    /// Waits for every worker.
    pub async fn join_all(&mut self) -> Vec<SessionReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        while let Some(report) = self.join_next().await {
            reports.push(report);
        }
        reports
    }

    /// Cancels every running worker. Their sockets close when the tasks drop;
    /// a partially assembled piece is discarded, never committed.
    pub fn abort_all(&mut self) {
        if !self.tasks.is_empty() {
            info!(workers = self.tasks.len(), "aborting peer workers");
        }
        self.tasks.abort_all();
    }
}
