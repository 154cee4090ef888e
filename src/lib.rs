pub mod bencode;
pub mod error;
pub mod peer;
pub mod state;
pub mod storage;
pub mod torrent;

// Re-export commonly used types for easier access
pub use error::{PeerError, TorrentError};
pub use peer::PeerAddr;
pub use peer::pool::{SessionPool, SessionReport};
pub use peer::session::{DialogEnd, PeerSession, SessionConfig, SessionStats};
pub use state::{CommitOutcome, SharedTorrent};
pub use storage::{FileStorage, MemoryStorage, PieceStorage};
pub use torrent::Torrent;
