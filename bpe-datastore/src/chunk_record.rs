/// One file (or file-diff) packed into a chunk.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileBlock {
    pub path: String,
    pub source_offset: u64,
    pub source_length: u64,
    pub chunk_offset: u64,
    /// Length this block actually contributes to the chunk, after any
    /// diff/compress transform has been applied.
    pub length: u64,
    pub is_diff: bool,
}

/// A packed unit of upload: an ordered list of file-blocks plus packing
/// state. Chunks are append-only while open and immutable once `finished`.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub ordinal: u64,
    pub capacity: u64,
    pub compressed: bool,
    pub blocks: Vec<FileBlock>,
    pub finished: bool,
    pub uploaded: bool,
}

impl ChunkRecord {
    pub fn new(ordinal: u64, capacity: u64, compressed: bool) -> Self {
        Self {
            ordinal,
            capacity,
            compressed,
            blocks: Vec::new(),
            finished: false,
            uploaded: false,
        }
    }

    pub fn real_len(&self) -> u64 {
        self.blocks.iter().map(|b| b.length).sum()
    }

    pub fn free_space(&self) -> u64 {
        self.capacity.saturating_sub(self.real_len())
    }

    pub fn len(&self) -> u64 {
        self.real_len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Locates the block covering a byte offset into the chunk's logical
    /// content, if that offset has already been packed.
    pub fn block_at(&self, offset: u64) -> Option<&FileBlock> {
        self.blocks
            .iter()
            .find(|b| offset >= b.chunk_offset && offset < b.chunk_offset + b.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_len_sums_block_lengths() {
        let mut chunk = ChunkRecord::new(0, 4096, false);
        chunk.blocks.push(FileBlock {
            path: "a".into(),
            source_offset: 0,
            source_length: 3,
            chunk_offset: 0,
            length: 3,
            is_diff: false,
        });
        chunk.blocks.push(FileBlock {
            path: "b".into(),
            source_offset: 0,
            source_length: 5,
            chunk_offset: 3,
            length: 5,
            is_diff: false,
        });
        assert_eq!(chunk.real_len(), 8);
        assert_eq!(chunk.free_space(), 4096 - 8);
    }

    #[test]
    fn block_at_finds_covering_block() {
        let mut chunk = ChunkRecord::new(0, 100, false);
        chunk.blocks.push(FileBlock {
            path: "a".into(),
            source_offset: 0,
            source_length: 3,
            chunk_offset: 0,
            length: 3,
            is_diff: false,
        });
        assert_eq!(chunk.block_at(1).unwrap().path, "a");
        assert!(chunk.block_at(3).is_none());
    }
}
