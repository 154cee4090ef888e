use bytes::{Buf, Bytes, BytesMut};

use crate::error::PeerError;

/// Largest payload a peer may announce. Twice a generous bitfield; a block
/// message is 16 KiB plus 9 bytes.
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Reassembles length-prefixed messages from arbitrarily chunked reads.
///
/// Bytes that do not yet form a whole message stay in `pending` until the
/// next [`Framer::push`]. Keep-alives (`L = 0`) are dropped.
#[derive(Debug)]
pub struct Framer {
    pending: BytesMut,
    max_frame_len: usize,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl Framer {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            max_frame_len,
        }
    }

    /// Appends `chunk` and returns every payload it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, PeerError> {
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while self.pending.len() >= 4 {
            let len = u32::from_be_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]) as usize;

            if len > self.max_frame_len {
                return Err(PeerError::MalformedMessage(format!(
                    "frame of {len} bytes exceeds limit of {}",
                    self.max_frame_len
                )));
            }
            if self.pending.len() < 4 + len {
                break;
            }

            self.pending.advance(4);
            if len == 0 {
                continue;
            }
            frames.push(self.pending.split_to(len).freeze());
        }

        Ok(frames)
    }

    /// Bytes carried over to the next read.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
