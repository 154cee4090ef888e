use std::io;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::peer::bitfield::Bitfield;
use crate::storage::PieceStorage;
use crate::torrent::Torrent;

/// What happened to a completed piece handed to [`SharedTorrent::commit_piece`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Written to storage and marked present.
    Saved,
    /// Another session got there first; the bytes were dropped.
    AlreadyPresent,
}

/// Torrent state shared by every peer session of one download.
///
/// The local bitfield is the only mutable part. Its lock is held for single
/// reads and for the check-save-mark sequence of a commit, never across
/// network I/O.
pub struct SharedTorrent {
    torrent: Torrent,
    have: Mutex<Bitfield>,
    storage: Arc<dyn PieceStorage>,
}

impl SharedTorrent {
    pub fn new(torrent: Torrent, storage: Arc<dyn PieceStorage>) -> Self {
        let have = Bitfield::new(torrent.piece_count);
        Self::with_bitfield(torrent, have, storage)
    }

    /// Resumes from a known local bitfield (pieces already on disk).
    pub fn with_bitfield(torrent: Torrent, have: Bitfield, storage: Arc<dyn PieceStorage>) -> Self {
        Self {
            torrent,
            have: Mutex::new(have),
            storage,
        }
    }

    pub fn torrent(&self) -> &Torrent {
        &self.torrent
    }

    pub fn info_hash(&self) -> &[u8; 20] {
        &self.torrent.info_hash
    }

    pub fn piece_count(&self) -> usize {
        self.torrent.piece_count
    }

    pub fn piece_len(&self, index: usize) -> Option<u32> {
        self.torrent.piece_len(index)
    }

    pub async fn missing_pieces(&self) -> Vec<usize> {
        self.have.lock().await.missing_pieces()
    }

    /// Pieces `remote` has that are still missing locally.
    pub async fn required_pieces(&self, remote: &Bitfield) -> Vec<usize> {
        self.have.lock().await.required_from(remote)
    }

    pub async fn has_piece(&self, index: usize) -> bool {
        self.have.lock().await.has_piece(index)
    }

    /// Saves `data` as piece `index` unless it is already present.
    ///
    /// The presence check, the storage write and the bit update happen under
    /// one lock, held across the write, so concurrent sessions delivering the
    /// same piece produce exactly one `save_piece` call. A storage failure
    /// leaves the piece missing.
    pub async fn commit_piece(&self, index: usize, data: &[u8]) -> io::Result<CommitOutcome> {
        let mut have = self.have.lock().await;
        if have.has_piece(index) {
            debug!(piece = index, "piece already present, dropping duplicate");
            return Ok(CommitOutcome::AlreadyPresent);
        }

        let offset = index as u64 * self.torrent.piece_length as u64;
        self.storage.save_piece(index, offset, data).await?;
        have.set_piece(index);

        info!(
            piece = index,
            have = have.count(),
            total = have.piece_count(),
            "piece committed"
        );
        Ok(CommitOutcome::Saved)
    }

    /// (pieces present, total pieces)
    pub async fn progress(&self) -> (usize, usize) {
        let have = self.have.lock().await;
        (have.count(), have.piece_count())
    }

    pub async fn is_complete(&self) -> bool {
        self.have.lock().await.is_complete()
    }

    /// Snapshot of the local bitfield.
    pub async fn bitfield(&self) -> Bitfield {
        self.have.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn shared(piece_count: u64) -> (Arc<SharedTorrent>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let torrent = Torrent::new([3; 20], 100, piece_count * 100);
        (
            Arc::new(SharedTorrent::new(torrent, storage.clone())),
            storage,
        )
    }

    #[tokio::test]
    async fn test_required_pieces_scenario() {
        let (state, _) = shared(3);
        assert_eq!(state.missing_pieces().await, vec![0, 1, 2]);

        let mut remote = Bitfield::new(3);
        remote.merge_bytes(&[0b1010_0000]);
        assert_eq!(state.required_pieces(&remote).await, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_commit_marks_piece_and_writes_at_offset() {
        let (state, storage) = shared(3);

        let outcome = state.commit_piece(1, &[5u8; 100]).await.unwrap();
        assert_eq!(outcome, CommitOutcome::Saved);
        assert!(state.has_piece(1).await);
        assert_eq!(state.missing_pieces().await, vec![0, 2]);
        assert_eq!(storage.piece(1), Some(vec![5u8; 100]));
        assert_eq!(state.progress().await, (1, 3));
    }

    #[tokio::test]
    async fn test_commit_twice_is_idempotent() {
        let (state, storage) = shared(2);

        state.commit_piece(0, &[1u8; 100]).await.unwrap();
        let second = state.commit_piece(0, &[2u8; 100]).await.unwrap();

        assert_eq!(second, CommitOutcome::AlreadyPresent);
        assert_eq!(storage.save_count(0), 1);
        assert_eq!(storage.piece(0), Some(vec![1u8; 100]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_save_once() {
        let (state, storage) = shared(4);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                state.commit_piece(3, &[9u8; 100]).await.unwrap()
            }));
        }

        let mut saved = 0;
        for handle in handles {
            if handle.await.unwrap() == CommitOutcome::Saved {
                saved += 1;
            }
        }

        assert_eq!(saved, 1);
        assert_eq!(storage.save_count(3), 1);
        assert!(state.has_piece(3).await);
    }

    /// Yields to the runtime before every write.
    struct SlowStorage(MemoryStorage);

    #[async_trait::async_trait]
    impl PieceStorage for SlowStorage {
        async fn save_piece(&self, index: usize, offset: u64, data: &[u8]) -> io::Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.0.save_piece(index, offset, data).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_commit_stays_atomic_across_slow_writes() {
        let storage = Arc::new(SlowStorage(MemoryStorage::new()));
        let state = Arc::new(SharedTorrent::new(
            Torrent::new([3; 20], 100, 200),
            storage.clone(),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                state.commit_piece(1, &[4u8; 100]).await.unwrap()
            }));
        }

        let mut saved = 0;
        for handle in handles {
            if handle.await.unwrap() == CommitOutcome::Saved {
                saved += 1;
            }
        }

        assert_eq!(saved, 1);
        assert_eq!(storage.0.save_count(1), 1);
        assert_eq!(state.missing_pieces().await, vec![0]);
    }

    #[tokio::test]
    async fn test_resume_from_bitfield() {
        let mut have = Bitfield::new(3);
        have.set_piece(0);
        have.set_piece(1);
        have.set_piece(2);
        let state = SharedTorrent::with_bitfield(
            Torrent::new([0; 20], 10, 30),
            have,
            Arc::new(MemoryStorage::new()),
        );
        assert!(state.is_complete().await);
        assert!(state.missing_pieces().await.is_empty());
    }
}
