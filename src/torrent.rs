use std::{fs, path::Path};

use sha1::{Digest, Sha1};

use crate::bencode::{self, Value};
use crate::error::TorrentError;

/// Piece geometry and identity of one torrent.
///
/// `info_hash` is kept in wire order (the raw SHA-1 digest of the `info` dictionary).
#[derive(Debug, Clone)]
pub struct Torrent {
    pub name: String,
    pub info_hash: [u8; 20],
    pub piece_length: u32,
    pub total_length: u64,
    pub piece_count: usize,
    /// SHA-1 per piece. Empty when the caller has no hashes to verify against.
    pub piece_hashes: Vec<[u8; 20]>,
}

impl Torrent {
    /// Geometry without piece hashes; completed pieces are committed unverified.
    pub fn new(info_hash: [u8; 20], piece_length: u32, total_length: u64) -> Self {
        let piece_count = if piece_length == 0 {
            0
        } else {
            total_length.div_ceil(piece_length as u64) as usize
        };
        Self {
            name: String::new(),
            info_hash,
            piece_length,
            total_length,
            piece_count,
            piece_hashes: Vec::new(),
        }
    }

    pub fn with_piece_hashes(mut self, piece_hashes: Vec<[u8; 20]>) -> Self {
        self.piece_hashes = piece_hashes;
        self
    }

    /// Byte length of piece `index`; the last piece may be short.
    pub fn piece_len(&self, index: usize) -> Option<u32> {
        if index >= self.piece_count {
            return None;
        }
        let start = index as u64 * self.piece_length as u64;
        let remaining = self.total_length.saturating_sub(start);
        Some(remaining.min(self.piece_length as u64) as u32)
    }

    /// True when `data` matches the known hash of piece `index`, or no hash is known.
    pub fn verify_piece(&self, index: usize, data: &[u8]) -> bool {
        match self.piece_hashes.get(index) {
            Some(expected) => Sha1::digest(data).as_slice() == expected,
            None => true,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TorrentError> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Reads name, piece length, total length and piece hashes from a `.torrent`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, TorrentError> {
        let root = bencode::parse(data)?;
        let info = root.get(b"info").ok_or(TorrentError::MissingField("info"))?;
        let Value::Dictionary { raw, .. } = info else {
            return Err(TorrentError::InvalidField("info", "not a dictionary".into()));
        };
        let info_hash: [u8; 20] = Sha1::digest(raw).into();

        let name = info
            .get(b"name")
            .and_then(Value::as_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();

        let piece_length = info
            .get(b"piece length")
            .and_then(Value::as_integer)
            .ok_or(TorrentError::MissingField("piece length"))?;
        let piece_length = u32::try_from(piece_length)
            .ok()
            .filter(|&l| l > 0)
            .ok_or_else(|| TorrentError::InvalidField("piece length", piece_length.to_string()))?;

        let total_length = total_length(info)?;

        let pieces = info
            .get(b"pieces")
            .and_then(Value::as_bytes)
            .ok_or(TorrentError::MissingField("pieces"))?;
        if pieces.len() % 20 != 0 {
            return Err(TorrentError::InvalidField(
                "pieces",
                format!("{} bytes is not a multiple of 20", pieces.len()),
            ));
        }
        let piece_hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let torrent = Self::new(info_hash, piece_length, total_length).with_piece_hashes(piece_hashes);
        if torrent.piece_count != torrent.piece_hashes.len() {
            return Err(TorrentError::InvalidField(
                "pieces",
                format!(
                    "{} hashes for {} pieces",
                    torrent.piece_hashes.len(),
                    torrent.piece_count
                ),
            ));
        }

        Ok(Self { name, ..torrent })
    }
}

/// Single-file `length`, or the sum of `files[].length`.
fn total_length(info: &Value<'_>) -> Result<u64, TorrentError> {
    if let Some(length) = info.get(b"length").and_then(Value::as_integer) {
        return u64::try_from(length)
            .map_err(|_| TorrentError::InvalidField("length", length.to_string()));
    }

    let Some(Value::List(files)) = info.get(b"files") else {
        return Err(TorrentError::MissingField("length"));
    };
    files.iter().try_fold(0u64, |acc, file| {
        let length = file
            .get(b"length")
            .and_then(Value::as_integer)
            .and_then(|l| u64::try_from(l).ok())
            .ok_or(TorrentError::InvalidField("files", "entry without length".into()))?;
        acc.checked_add(length)
            .ok_or_else(|| TorrentError::InvalidField("files", "total length overflows".into()))
    })
}
