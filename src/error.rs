use std::io;

use thiserror::Error;

/// Everything that can end a peer session early.
///
/// The `Display` output doubles as the session's last-error string.
#[derive(Debug, Error)]
pub enum PeerError {
    /// The `host:port` string could not be parsed. Raised before any socket exists.
    #[error("invalid peer address {0:?}")]
    InvalidAddress(String),

    /// TCP connect failed: timeout, refusal or name resolution.
    #[error("connect error: {0}")]
    Connect(String),

    /// The remote handshake was short, spoke another protocol or named another torrent.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// A framed message violated the wire format.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Read or write failure on an established connection.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The storage collaborator refused a completed piece.
    #[error("storage error: {0}")]
    Storage(io::Error),
}

/// Errors raised while loading torrent metadata.
#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("bencode error: {0}")]
    Bencode(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{0}': {1}")]
    InvalidField(&'static str, String),
}
