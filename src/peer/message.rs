use bytes::{Buf, Bytes};

use crate::error::PeerError;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for MessageId {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Choke),
            1 => Ok(Self::Unchoke),
            2 => Ok(Self::Interested),
            3 => Ok(Self::NotInterested),
            4 => Ok(Self::Have),
            5 => Ok(Self::Bitfield),
            6 => Ok(Self::Request),
            7 => Ok(Self::Piece),
            8 => Ok(Self::Cancel),
            _ => Err(()),
        }
    }
}

/// A peer wire message after the handshake.
///
/// Only the leech subset is modelled. Anything else decodes to `Unknown`
/// carrying its id and raw payload, and is ignored by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece_index: u32,
    },
    Bitfield(Bytes),
    Request {
        piece_index: u32,
        offset: u32,
        length: u32,
    },
    Piece {
        piece_index: u32,
        offset: u32,
        data: Bytes,
    },
    Unknown {
        id: u8,
        payload: Bytes,
    },
}

impl Message {
    /// Encodes the message with its 4-byte big-endian length prefix.
    pub fn serialize(&self) -> Vec<u8> {
        let (kind, payload): (u8, Vec<u8>) = match self {
            Message::Unchoke => (MessageId::Unchoke as u8, vec![]),
            Message::Interested => (MessageId::Interested as u8, vec![]),
            Message::NotInterested => (MessageId::NotInterested as u8, vec![]),
            Message::Have { piece_index } => {
                (MessageId::Have as u8, piece_index.to_be_bytes().to_vec())
            }
            Message::Bitfield(bits) => (MessageId::Bitfield as u8, bits.to_vec()),
            Message::Request {
                piece_index,
                offset,
                length,
            } => {
                let mut payload = Vec::with_capacity(12);
                payload.extend_from_slice(&piece_index.to_be_bytes());
                payload.extend_from_slice(&offset.to_be_bytes());
                payload.extend_from_slice(&length.to_be_bytes());
                (MessageId::Request as u8, payload)
            }
            Message::Piece {
                piece_index,
                offset,
                data,
            } => {
                let mut payload = Vec::with_capacity(8 + data.len());
                payload.extend_from_slice(&piece_index.to_be_bytes());
                payload.extend_from_slice(&offset.to_be_bytes());
                payload.extend_from_slice(data);
                (MessageId::Piece as u8, payload)
            }
            Message::Unknown { id, payload } => (*id, payload.to_vec()),
        };

        let total_len = 1 + payload.len();
        let mut buf = Vec::with_capacity(4 + total_len);
        buf.extend_from_slice(&(total_len as u32).to_be_bytes());
        buf.push(kind);
        buf.extend_from_slice(&payload);
        buf
    }

    /// Decodes one framed payload (id byte first, length prefix already stripped).
    pub fn deserialize(mut payload: Bytes) -> Result<Self, PeerError> {
        if payload.is_empty() {
            return Err(PeerError::MalformedMessage("empty payload".into()));
        }
        let total = payload.len();
        let id = payload.get_u8();

        let Ok(kind) = MessageId::try_from(id) else {
            return Ok(Message::Unknown { id, payload });
        };

        match kind {
            MessageId::Unchoke => Ok(Message::Unchoke),
            MessageId::Interested => Ok(Message::Interested),
            MessageId::NotInterested => Ok(Message::NotInterested),
            MessageId::Have => {
                if total != 5 {
                    return Err(PeerError::MalformedMessage(format!(
                        "have message of {total} bytes"
                    )));
                }
                Ok(Message::Have {
                    piece_index: payload.get_u32(),
                })
            }
            MessageId::Bitfield => Ok(Message::Bitfield(payload)),
            MessageId::Request => {
                if total != 13 {
                    return Err(PeerError::MalformedMessage(format!(
                        "request message of {total} bytes"
                    )));
                }
                Ok(Message::Request {
                    piece_index: payload.get_u32(),
                    offset: payload.get_u32(),
                    length: payload.get_u32(),
                })
            }
            MessageId::Piece => {
                if total < 9 {
                    return Err(PeerError::MalformedMessage(format!(
                        "piece message of {total} bytes"
                    )));
                }
                let piece_index = payload.get_u32();
                let offset = payload.get_u32();
                Ok(Message::Piece {
                    piece_index,
                    offset,
                    data: payload,
                })
            }
            MessageId::Choke | MessageId::Cancel => Ok(Message::Unknown { id, payload }),
        }
    }
}
