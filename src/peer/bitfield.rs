/// Which pieces a party (local or remote) possesses.
///
/// Bits are numbered from the high bit of the first byte, as on the wire.
/// The piece count is fixed at construction and spare bits in the last byte
/// are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    piece_count: usize,
}

impl Bitfield {
    /// Creates an empty bitfield for `piece_count` pieces.
    pub fn new(piece_count: usize) -> Self {
        Self {
            bits: vec![0; piece_count.div_ceil(8)],
            piece_count,
        }
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn has_piece(&self, index: usize) -> bool {
        if index >= self.piece_count {
            return false;
        }
        let bit = 7 - (index % 8);
        self.bits[index / 8] & (1 << bit) != 0
    }

    /// Marks `index` as possessed. Out of range indices are ignored.
    pub fn set_piece(&mut self, index: usize) {
        if index >= self.piece_count {
            return;
        }
        let bit = 7 - (index % 8);
        self.bits[index / 8] |= 1 << bit;
    }

    /// ORs a received bitfield payload into this one.
    ///
    /// Never clears a bit. Bytes beyond our length and spare bits past the
    /// last piece are dropped.
    pub fn merge_bytes(&mut self, bytes: &[u8]) {
        for (own, theirs) in self.bits.iter_mut().zip(bytes) {
            *own |= theirs;
        }
        self.clear_spare_bits();
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.piece_count;
        if spare > 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFF << spare;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.count() == self.piece_count
    }

    /// Indices not yet possessed, ascending.
    pub fn missing_pieces(&self) -> Vec<usize> {
        (0..self.piece_count).filter(|&i| !self.has_piece(i)).collect()
    }

    /// Indices `remote` has that `self` still lacks, ascending.
    pub fn required_from(&self, remote: &Bitfield) -> Vec<usize> {
        (0..self.piece_count)
            .filter(|&i| remote.has_piece(i) && !self.has_piece(i))
            .collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}
