use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as TokioMutex;

/// Destination for completed pieces.
///
/// Called by [`SharedTorrent::commit_piece`](crate::state::SharedTorrent::commit_piece)
/// while the torrent's commit lock is held, so implementations see at most one
/// call per piece index.
#[async_trait]
pub trait PieceStorage: Send + Sync {
    /// Persists piece `index`, which starts at byte `offset` of the torrent payload.
    async fn save_piece(&self, index: usize, offset: u64, data: &[u8]) -> io::Result<()>;
}

/// Keeps pieces in memory and counts every save. Useful for tests and
/// for callers that post-process pieces themselves.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    pieces: HashMap<usize, Vec<u8>>,
    saves: HashMap<usize, usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn piece(&self, index: usize) -> Option<Vec<u8>> {
        self.lock().pieces.get(&index).cloned()
    }

    /// How many times `save_piece` ran for `index`.
    pub fn save_count(&self, index: usize) -> usize {
        self.lock().saves.get(&index).copied().unwrap_or(0)
    }

    pub fn stored_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.lock().pieces.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A panic while holding this lock cannot leave the maps half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PieceStorage for MemoryStorage {
    async fn save_piece(&self, index: usize, _offset: u64, data: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        inner.pieces.insert(index, data.to_vec());
        *inner.saves.entry(index).or_insert(0) += 1;
        Ok(())
    }
}

/// Writes pieces into a single output file at their payload offset.
#[derive(Debug)]
pub struct FileStorage {
    file: TokioMutex<File>,
}

impl FileStorage {
    /// Opens (or creates) `path` and sizes it to `total_length`.
    pub async fn create(path: impl AsRef<Path>, total_length: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .await?;
        file.set_len(total_length).await?;
        Ok(Self {
            file: TokioMutex::new(file),
        })
    }
}

#[async_trait]
impl PieceStorage for FileStorage {
    async fn save_piece(&self, _index: usize, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_counts_saves() {
        let storage = MemoryStorage::new();
        storage.save_piece(2, 0, &[1, 2, 3]).await.unwrap();
        storage.save_piece(2, 0, &[4, 5, 6]).await.unwrap();

        assert_eq!(storage.save_count(2), 2);
        assert_eq!(storage.save_count(0), 0);
        assert_eq!(storage.piece(2), Some(vec![4, 5, 6]));
        assert_eq!(storage.stored_indices(), vec![2]);
    }

    #[tokio::test]
    async fn test_file_storage_writes_at_offset() {
        let path = std::env::temp_dir().join(format!("rs_leech_storage_{}", std::process::id()));
        let storage = FileStorage::create(&path, 8).await.unwrap();

        storage.save_piece(1, 4, &[9, 9, 9, 9]).await.unwrap();
        storage.save_piece(0, 0, &[1, 2, 3, 4]).await.unwrap();

        let contents = tokio::fs::read(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(contents, vec![1, 2, 3, 4, 9, 9, 9, 9]);
    }
}
