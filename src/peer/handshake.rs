use crate::error::PeerError;
use crate::peer::{PSTR, PSTR_LEN};

pub const HANDSHAKE_LEN: usize = 68;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PSTR_LEN;
        buf[1..20].copy_from_slice(PSTR.as_bytes());
        // buf[20..28] reserved, left zero
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parses a remote handshake. Reserved bytes are ignored.
    pub fn deserialize(buf: &[u8]) -> Result<Self, PeerError> {
        if buf.len() != HANDSHAKE_LEN {
            return Err(PeerError::Handshake(format!(
                "expected {HANDSHAKE_LEN} bytes, got {}",
                buf.len()
            )));
        }
        if buf[0] != PSTR_LEN {
            return Err(PeerError::Handshake(format!(
                "protocol name length {}",
                buf[0]
            )));
        }
        if &buf[1..20] != PSTR.as_bytes() {
            return Err(PeerError::Handshake(format!(
                "unknown protocol {:?}",
                String::from_utf8_lossy(&buf[1..20])
            )));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self { info_hash, peer_id })
    }

    /// Parses a remote handshake and checks it names `expected_info_hash`.
    /// Returns the remote peer id.
    ///
    /// The info hash is compared in wire order, the same order `serialize` sends it.
    pub fn validate(buf: &[u8], expected_info_hash: &[u8; 20]) -> Result<[u8; 20], PeerError> {
        let remote = Self::deserialize(buf)?;
        if &remote.info_hash != expected_info_hash {
            return Err(PeerError::Handshake("info hash mismatch".into()));
        }
        Ok(remote.peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const INFO_HASH: [u8; 20] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20,
    ];

    fn valid_response() -> [u8; HANDSHAKE_LEN] {
        Handshake::new(INFO_HASH, [0xAB; 20]).serialize()
    }

    #[test]
    fn test_handshake_serialize_layout() {
        let peer_id = [2u8; 20];
        let serialized = Handshake::new(INFO_HASH, peer_id).serialize();

        assert_eq!(serialized.len(), 68);
        assert_eq!(serialized[0], 19);
        assert_eq!(&serialized[1..20], b"BitTorrent protocol");
        assert_eq!(&serialized[20..28], &[0u8; 8]);
        assert_eq!(&serialized[28..48], &INFO_HASH);
        assert_eq!(&serialized[48..68], &peer_id);
    }

    #[test]
    fn test_validate_returns_peer_id() {
        let peer_id = Handshake::validate(&valid_response(), &INFO_HASH).unwrap();
        assert_eq!(peer_id, [0xAB; 20]);
    }

    #[test]
    fn test_validate_ignores_reserved_bytes() {
        let mut buf = valid_response();
        buf[20..28].fill(0xFF);
        assert!(Handshake::validate(&buf, &INFO_HASH).is_ok());
    }

    #[test]
    fn test_validate_rejects_short_read() {
        let buf = valid_response();
        assert_matches!(
            Handshake::validate(&buf[..67], &INFO_HASH),
            Err(PeerError::Handshake(_))
        );
    }

    #[test]
    fn test_any_corrupted_header_or_hash_byte_fails() {
        for i in (0..20).chain(28..48) {
            let mut buf = valid_response();
            buf[i] ^= 0x01;
            assert_matches!(
                Handshake::validate(&buf, &INFO_HASH),
                Err(PeerError::Handshake(_)),
                "byte {i} corrupted"
            );
        }
    }

    #[test]
    fn test_reversed_info_hash_is_rejected() {
        let mut reversed = INFO_HASH;
        reversed.reverse();
        let buf = Handshake::new(reversed, [0; 20]).serialize();
        assert_matches!(
            Handshake::validate(&buf, &INFO_HASH),
            Err(PeerError::Handshake(_))
        );
    }

    #[test]
    fn test_peer_id_is_not_validated() {
        let mut buf = valid_response();
        buf[48..68].fill(0);
        assert_eq!(Handshake::validate(&buf, &INFO_HASH).unwrap(), [0; 20]);
    }
}
