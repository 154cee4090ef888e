use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::PeerError;
use crate::peer::PeerAddr;
use crate::peer::bitfield::Bitfield;
use crate::peer::framer::{Framer, MAX_FRAME_LEN};
use crate::peer::handshake::{HANDSHAKE_LEN, Handshake};
use crate::peer::message::Message;
use crate::state::{CommitOutcome, SharedTorrent};

pub const BLOCK_SIZE: u32 = 16384;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DIALOG_TIMEOUT: Duration = Duration::from_secs(4);
const UNCHOKE_TIMEOUT: Duration = Duration::from_secs(20);
const PIECE_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK_SIZE: usize = 1024;

/// Timeouts and sizes for one peer session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Read timeout until interest is declared.
    pub dialog_timeout: Duration,
    /// Read timeout after sending `Interested`, while waiting for an unchoke.
    pub unchoke_timeout: Duration,
    /// Read timeout after sending a block request.
    pub piece_timeout: Duration,
    pub block_size: u32,
    pub read_chunk_size: usize,
    pub max_frame_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            dialog_timeout: DIALOG_TIMEOUT,
            unchoke_timeout: UNCHOKE_TIMEOUT,
            piece_timeout: PIECE_TIMEOUT,
            block_size: BLOCK_SIZE,
            read_chunk_size: READ_CHUNK_SIZE,
            max_frame_len: MAX_FRAME_LEN,
        }
    }
}

/// Why a dialog that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogEnd {
    /// The peer has nothing left that we are missing.
    #[default]
    Finished,
    /// No data within the read timeout after interest was declared.
    PeerIdle,
    /// The peer closed the connection after interest was declared.
    PeerClosed,
    /// A read or write failed after interest was declared.
    TransportLost,
}

#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub remote_peer_id: [u8; 20],
    pub requests_sent: u64,
    pub blocks_received: u64,
    pub bytes_received: u64,
    pub pieces_committed: u64,
    pub duplicates_discarded: u64,
    pub hash_failures: u64,
    pub end: DialogEnd,
}

/// Downloads from one remote peer on behalf of a [`SharedTorrent`].
///
/// A session is connect, handshake, then the message dialog. Every outcome
/// closes the socket; failures are returned and kept in [`last_error`](Self::last_error).
pub struct PeerSession {
    torrent: Arc<SharedTorrent>,
    peer_id: [u8; 20],
    config: SessionConfig,
    last_error: Option<String>,
}

impl PeerSession {
    pub fn new(torrent: Arc<SharedTorrent>, peer_id: [u8; 20]) -> Self {
        Self {
            torrent,
            peer_id,
            config: SessionConfig::default(),
            last_error: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Connects to `peer_addr` (`host:port`) and downloads whatever it can offer.
    pub async fn download(&mut self, peer_addr: &str) -> Result<SessionStats, PeerError> {
        let result = self.connect_and_run(peer_addr).await;
        self.record(peer_addr, result)
    }

    /// Runs handshake and dialog over an already established stream.
    pub async fn download_over<S>(&mut self, label: &str, stream: S) -> Result<SessionStats, PeerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.run(label, stream).await;
        self.record(label, result)
    }

    fn record(
        &mut self,
        label: &str,
        result: Result<SessionStats, PeerError>,
    ) -> Result<SessionStats, PeerError> {
        match &result {
            Ok(stats) => {
                self.last_error = None;
                info!(
                    peer = %label,
                    pieces = stats.pieces_committed,
                    blocks = stats.blocks_received,
                    end = ?stats.end,
                    "session finished"
                );
            }
            Err(e) => {
                warn!(peer = %label, error = %e, "session failed");
                self.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn connect_and_run(&self, peer_addr: &str) -> Result<SessionStats, PeerError> {
        let addr: PeerAddr = peer_addr.parse()?;
        let stream = self.connect(&addr).await?;
        self.run(peer_addr, stream).await
    }

    async fn connect(&self, addr: &PeerAddr) -> Result<TcpStream, PeerError> {
        let connect = TcpStream::connect((addr.host.as_str(), addr.port));
        match timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => {
                debug!(peer = %addr, "connected");
                Ok(stream)
            }
            Ok(Err(e)) => Err(PeerError::Connect(e.to_string())),
            Err(_) => Err(PeerError::Connect(format!(
                "timed out after {:?}",
                self.config.connect_timeout
            ))),
        }
    }

    async fn run<S>(&self, label: &str, mut stream: S) -> Result<SessionStats, PeerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let remote_peer_id = self.handshake(&mut stream).await?;
        debug!(
            peer = %label,
            remote_id = %String::from_utf8_lossy(&remote_peer_id),
            "handshake ok"
        );

        let mut dialog = Dialog::new(label, stream, &self.torrent, &self.config);
        let mut stats = dialog.run().await?;
        stats.remote_peer_id = remote_peer_id;
        Ok(stats)
    }

    async fn handshake<S>(&self, stream: &mut S) -> Result<[u8; 20], PeerError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ours = Handshake::new(*self.torrent.info_hash(), self.peer_id);
        stream.write_all(&ours.serialize()).await?;

        let mut response = [0u8; HANDSHAKE_LEN];
        match timeout(self.config.handshake_timeout, stream.read_exact(&mut response)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(PeerError::Handshake(format!("short read: {e}"))),
            Err(_) => {
                return Err(PeerError::Handshake(format!(
                    "no response within {:?}",
                    self.config.handshake_timeout
                )));
            }
        }

        Handshake::validate(&response, self.torrent.info_hash())
    }
}

/// Result of one bounded socket read.
enum ReadOutcome {
    Data(usize),
    TimedOut,
    Closed,
    Failed(io::Error),
}

/// The single piece being reassembled from this peer's blocks.
#[derive(Debug, Default)]
struct PieceAssembly {
    index: Option<usize>,
    data: Vec<u8>,
}

impl PieceAssembly {
    fn append(&mut self, index: usize, block: &[u8]) {
        if self.index != Some(index) {
            if !self.data.is_empty() {
                debug!(
                    dropped = ?self.index,
                    bytes = self.data.len(),
                    "abandoning partial piece"
                );
            }
            self.data.clear();
            self.index = Some(index);
        }
        self.data.extend_from_slice(block);
    }

    /// Hands out the piece and resets once `expected` bytes have accumulated.
    fn take_complete(&mut self, expected: usize) -> Option<(usize, Vec<u8>)> {
        if self.data.len() < expected {
            return None;
        }
        let index = self.index.take()?;
        let mut data = std::mem::take(&mut self.data);
        data.truncate(expected);
        Some((index, data))
    }
}

/// Next block to request: piece and byte offset within it.
#[derive(Debug, Default)]
struct RequestCursor {
    piece: Option<usize>,
    offset: u32,
}

struct Dialog<'a, S> {
    label: &'a str,
    stream: S,
    torrent: &'a SharedTorrent,
    config: &'a SessionConfig,
    framer: Framer,
    remote: Bitfield,
    assembly: PieceAssembly,
    cursor: RequestCursor,
    interest_declared: bool,
    read_timeout: Duration,
    stats: SessionStats,
}

impl<'a, S> Dialog<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(label: &'a str, stream: S, torrent: &'a SharedTorrent, config: &'a SessionConfig) -> Self {
        Self {
            label,
            stream,
            torrent,
            config,
            framer: Framer::new(config.max_frame_len),
            remote: Bitfield::new(torrent.piece_count()),
            assembly: PieceAssembly::default(),
            cursor: RequestCursor::default(),
            interest_declared: false,
            read_timeout: config.dialog_timeout,
            stats: SessionStats::default(),
        }
    }

    async fn run(&mut self) -> Result<SessionStats, PeerError> {
        let mut buf = vec![0u8; self.config.read_chunk_size.max(1)];

        let end = loop {
            match self.read(&mut buf).await {
                ReadOutcome::Data(n) => match self.handle_chunk(&buf[..n]).await {
                    Ok(Some(end)) => break end,
                    Ok(None) => {}
                    // Only sends produce transport errors here.
                    Err(PeerError::Transport(e)) if self.interest_declared => {
                        debug!(peer = %self.label, error = %e, "write failed, treating as departure");
                        break DialogEnd::TransportLost;
                    }
                    Err(e) => return Err(e),
                },
                ReadOutcome::TimedOut => {
                    if self.interest_declared {
                        break DialogEnd::PeerIdle;
                    }
                    trace!(peer = %self.label, "read timed out");
                    self.declare_interest().await?;
                }
                ReadOutcome::Closed => {
                    if self.interest_declared {
                        break DialogEnd::PeerClosed;
                    }
                    debug!(peer = %self.label, "peer closed before interest was declared");
                    self.declare_interest().await?;
                }
                ReadOutcome::Failed(e) => {
                    if self.interest_declared {
                        debug!(peer = %self.label, error = %e, "read failed, treating as departure");
                        break DialogEnd::TransportLost;
                    }
                    debug!(peer = %self.label, error = %e, "read failed before interest was declared");
                    self.declare_interest().await?;
                }
            }
        };

        self.stats.end = end;
        Ok(self.stats.clone())
    }

    async fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        match timeout(self.read_timeout, self.stream.read(buf)).await {
            Err(_) => ReadOutcome::TimedOut,
            Ok(Ok(0)) => ReadOutcome::Closed,
            Ok(Ok(n)) => ReadOutcome::Data(n),
            Ok(Err(e)) => ReadOutcome::Failed(e),
        }
    }

    /// Processes every message completed by `chunk`. Returns `Some` once
    /// interest is declared and the peer has nothing left we need.
    async fn handle_chunk(&mut self, chunk: &[u8]) -> Result<Option<DialogEnd>, PeerError> {
        for payload in self.framer.push(chunk)? {
            let message = Message::deserialize(payload)?;
            self.process(message).await?;

            if self.interest_declared && self.torrent.required_pieces(&self.remote).await.is_empty() {
                return Ok(Some(DialogEnd::Finished));
            }
        }
        Ok(None)
    }

    async fn process(&mut self, message: Message) -> Result<(), PeerError> {
        match message {
            Message::Have { piece_index } => {
                trace!(peer = %self.label, piece = piece_index, "have");
                self.remote.set_piece(piece_index as usize);
            }
            Message::Bitfield(bits) => {
                self.remote.merge_bytes(&bits);
                debug!(
                    peer = %self.label,
                    available = self.remote.count(),
                    "bitfield received"
                );
            }
            Message::Unchoke => {
                debug!(peer = %self.label, "unchoked");
                self.request_next().await?;
            }
            Message::Piece {
                piece_index,
                offset,
                data,
            } => {
                self.receive_block(piece_index as usize, offset, data).await?;
                self.request_next().await?;
            }
            Message::Interested
            | Message::NotInterested
            | Message::Request { .. }
            | Message::Unknown { .. } => {
                trace!(peer = %self.label, ?message, "ignored");
            }
        }
        Ok(())
    }

    async fn declare_interest(&mut self) -> Result<(), PeerError> {
        let required = self.torrent.required_pieces(&self.remote).await;
        let message = if required.is_empty() {
            Message::NotInterested
        } else {
            self.read_timeout = self.config.unchoke_timeout;
            Message::Interested
        };
        self.send(&message).await?;
        self.interest_declared = true;

        debug!(
            peer = %self.label,
            ?message,
            wanted = required.len(),
            "interest declared"
        );
        Ok(())
    }

    /// Requests the next block of the current piece, choosing a new piece
    /// at random once the cursor has run past the end of the current one.
    async fn request_next(&mut self) -> Result<(), PeerError> {
        self.read_timeout = self.config.piece_timeout;

        let required = self.torrent.required_pieces(&self.remote).await;
        if required.is_empty() {
            return Ok(());
        }

        let current = self
            .cursor
            .piece
            .and_then(|piece| Some((piece, self.torrent.piece_len(piece)?)))
            .filter(|&(_, len)| self.cursor.offset < len);
        let (piece, piece_len) = match current {
            Some(current) => current,
            None => {
                let piece = required[rand::random_range(0..required.len())];
                let Some(len) = self.torrent.piece_len(piece) else {
                    return Ok(());
                };
                self.cursor = RequestCursor {
                    piece: Some(piece),
                    offset: 0,
                };
                (piece, len)
            }
        };

        let offset = self.cursor.offset;
        let length = self.config.block_size.min(piece_len - offset);
        self.send(&Message::Request {
            piece_index: piece as u32,
            offset,
            length,
        })
        .await?;
        self.cursor.offset = offset.saturating_add(self.config.block_size);
        self.stats.requests_sent += 1;

        trace!(peer = %self.label, piece, offset, length, "block requested");
        Ok(())
    }

    async fn receive_block(&mut self, index: usize, offset: u32, data: Bytes) -> Result<(), PeerError> {
        let Some(expected) = self.torrent.piece_len(index) else {
            return Err(PeerError::MalformedMessage(format!(
                "piece index {index} out of range"
            )));
        };

        self.stats.blocks_received += 1;
        self.stats.bytes_received += data.len() as u64;
        trace!(peer = %self.label, piece = index, offset, len = data.len(), "block received");

        self.assembly.append(index, &data);
        if let Some((index, piece)) = self.assembly.take_complete(expected as usize) {
            self.commit(index, piece).await?;
        }
        Ok(())
    }

    async fn commit(&mut self, index: usize, piece: Vec<u8>) -> Result<(), PeerError> {
        if !self.torrent.torrent().verify_piece(index, &piece) {
            warn!(peer = %self.label, piece = index, "hash mismatch, discarding piece");
            self.stats.hash_failures += 1;
            return Ok(());
        }

        match self
            .torrent
            .commit_piece(index, &piece)
            .await
            .map_err(PeerError::Storage)?
        {
            CommitOutcome::Saved => self.stats.pieces_committed += 1,
            CommitOutcome::AlreadyPresent => self.stats.duplicates_discarded += 1,
        }
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<(), PeerError> {
        self.stream.write_all(&message.serialize()).await?;
        Ok(())
    }
}
