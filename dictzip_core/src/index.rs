use std::ops::Range;

/// Stream offsets of every compressed block.
///
/// Holds `block_count + 1` entries: `offsets[0]` is the first byte after the
/// header and `offsets[i + 1] = offsets[i] + block_lengths[i]`, so block `i`
/// occupies `offsets[i]..offsets[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndex {
    offsets: Vec<u64>,
}

impl BlockIndex {
    pub fn new(payload_start: u64, block_lengths: &[u16]) -> Self {
        let mut offsets = Vec::with_capacity(block_lengths.len() + 1);
        let mut offset = payload_start;
        offsets.push(offset);
        for &len in block_lengths {
            offset += len as u64;
            offsets.push(offset);
        }
        Self { offsets }
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Stream offset of block `idx`, or of the body end for `idx == block_count`.
    pub fn offset(&self, idx: usize) -> Option<u64> {
        self.offsets.get(idx).copied()
    }

    /// Compressed byte range of block `idx`.
    pub fn span(&self, idx: usize) -> Option<Range<u64>> {
        if idx >= self.block_count() {
            return None;
        }
        Some(self.offsets[idx]..self.offsets[idx + 1])
    }

    pub fn compressed_len(&self, idx: usize) -> Option<u64> {
        self.span(idx).map(|r| r.end - r.start)
    }

    /// First byte after the last indexed block.
    pub fn body_end(&self) -> u64 {
        self.offsets[self.offsets.len() - 1]
    }

    /// Sum of all block lengths.
    pub fn compressed_size(&self) -> u64 {
        self.body_end() - self.offsets[0]
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cumulative_offsets() {
        let index = BlockIndex::new(28, &[100, 0, 65535]);
        assert_eq!(index.offsets(), &[28, 128, 128, 65663]);
        assert_eq!(index.block_count(), 3);
        assert_eq!(index.span(0), Some(28..128));
        assert_eq!(index.compressed_len(1), Some(0));
        assert_eq!(index.compressed_len(2), Some(65535));
        assert_eq!(index.span(3), None);
        assert_eq!(index.offset(3), Some(65663));
        assert_eq!(index.body_end(), 65663);
        assert_eq!(index.compressed_size(), 65635);
        assert!(index.offsets().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn empty_table() {
        let index = BlockIndex::new(16, &[]);
        assert_eq!(index.block_count(), 0);
        assert_eq!(index.offsets(), &[16]);
        assert_eq!(index.span(0), None);
        assert_eq!(index.compressed_size(), 0);
    }
}
