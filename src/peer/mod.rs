use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use rand::{Rng, distr::Alphanumeric};

use crate::error::PeerError;

pub mod bitfield;
pub mod framer;
pub mod handshake;
pub mod message;
pub mod pool;
pub mod session;

#[cfg(test)]
pub(crate) mod test_peer;

const PSTR: &str = "BitTorrent protocol";
const PSTR_LEN: u8 = PSTR.len() as u8; // always 19

const PEER_ID_PREFIX: &[u8; 8] = b"-RL0100-";

/// Peer id used when the caller does not supply one. Generated once per process.
pub static LOCAL_PEER_ID: Lazy<[u8; 20]> = Lazy::new(generate_peer_id);

/// Azureus-style id: client prefix followed by 12 random alphanumerics.
pub fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    peer_id[..8].copy_from_slice(PEER_ID_PREFIX);
    let mut rng = rand::rng();
    for byte in &mut peer_id[8..] {
        *byte = rng.sample(Alphanumeric);
    }
    peer_id
}

/// A `host:port` connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for PeerAddr {
    type Err = PeerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PeerError::InvalidAddress(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
