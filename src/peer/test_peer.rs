//! A scripted remote peer for exercising sessions over in-memory or loopback streams.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::peer::handshake::{HANDSHAKE_LEN, Handshake};
use crate::peer::message::Message;

pub const INFO_HASH: [u8; 20] = [7; 20];
pub const REMOTE_PEER_ID: [u8; 20] = *b"-XX0001-remotepeer01";

/// What the remote does after the handshake.
#[derive(Debug, Default)]
pub struct RemoteScript {
    /// Sent right after the handshake.
    pub opening: Vec<Message>,
    /// Answer `Interested` with `Unchoke`.
    pub unchoke: bool,
    /// Drop the connection as soon as interest is declared.
    pub close_after_interest: bool,
    /// Stop answering requests after this many (they are still logged).
    pub max_requests: Option<usize>,
}

impl RemoteScript {
    /// Advertises `bitfield`, unchokes on interest and serves every request.
    pub fn seeder(bitfield: Vec<u8>) -> Self {
        Self {
            opening: vec![Message::Bitfield(Bytes::from(bitfield))],
            unchoke: true,
            ..Self::default()
        }
    }
}

/// What the remote observed from the session under test.
#[derive(Debug, Default)]
pub struct RemoteLog {
    pub interest: Option<Message>,
    pub requests: Vec<(u32, u32, u32)>,
}

pub async fn answer_handshake<S>(stream: &mut S, info_hash: [u8; 20])
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut theirs = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut theirs).await.unwrap();
    assert_eq!(&theirs[28..48], &INFO_HASH);
    stream
        .write_all(&Handshake::new(info_hash, REMOTE_PEER_ID).serialize())
        .await
        .unwrap();
}

/// Next non keep-alive payload, or `None` once the session hung up.
async fn read_payload<S>(stream: &mut S) -> Option<Bytes>
where
    S: AsyncRead + Unpin,
{
    loop {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.ok()?;
        let len = u32::from_be_bytes(len) as usize;
        if len == 0 {
            continue;
        }
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.ok()?;
        return Some(Bytes::from(payload));
    }
}

/// Plays `script` until the session closes the stream. Every served block is
/// filled with its piece index.
pub async fn serve<S>(mut stream: S, script: RemoteScript) -> RemoteLog
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    answer_handshake(&mut stream, INFO_HASH).await;
    for message in &script.opening {
        stream.write_all(&message.serialize()).await.unwrap();
    }

    let mut log = RemoteLog::default();
    while let Some(payload) = read_payload(&mut stream).await {
        if let Ok(message @ (Message::Interested | Message::NotInterested)) =
            Message::deserialize(payload)
        {
            log.interest = Some(message);
            break;
        }
    }
    if log.interest.is_none() || script.close_after_interest {
        return log;
    }

    if script.unchoke && log.interest == Some(Message::Interested) {
        let _ = stream.write_all(&Message::Unchoke.serialize()).await;
    }

    let mut answered = 0;
    while let Some(payload) = read_payload(&mut stream).await {
        let Ok(Message::Request {
            piece_index,
            offset,
            length,
        }) = Message::deserialize(payload)
        else {
            continue;
        };
        log.requests.push((piece_index, offset, length));
        if script.max_requests.is_some_and(|max| answered >= max) {
            continue;
        }
        answered += 1;

        let piece = Message::Piece {
            piece_index,
            offset,
            data: Bytes::from(vec![piece_index as u8; length as usize]),
        };
        if stream.write_all(&piece.serialize()).await.is_err() {
            break;
        }
    }
    log
}

/// Session-side stream whose reads fail with `ConnectionReset` once the
/// session has written `Interested`.
pub struct ReadFailsAfterInterest<S> {
    inner: S,
    interested: bool,
}

impl<S> ReadFailsAfterInterest<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            interested: false,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ReadFailsAfterInterest<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.interested {
            return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ReadFailsAfterInterest<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if buf == Message::Interested.serialize().as_slice() {
            this.interested = true;
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
