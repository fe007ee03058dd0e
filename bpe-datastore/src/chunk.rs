use bpe_api_types::EngineError;

use crate::chunk_record::{ChunkRecord, FileBlock};
use crate::files_db::FilesDb;
use crate::packer::compress_bytes;
use crate::storage_reader::StorageReader;

/// Read-side view over an already-packed (but possibly not yet uploaded)
/// chunk.
///
/// Content is never cached: every `read` re-derives the requested bytes
/// from the Source via `StorageReader`, honoring whatever diff/compress
/// transform the packer recorded for that block. This keeps the engine
/// core from needing to hold chunk-sized buffers in memory, at the cost of
/// re-reading the source once per upload retry — acceptable since local
/// disk and the common remote-source RPCs are both cheap to re-read
/// relative to the network upload itself.
pub struct Chunk<'a> {
    record: ChunkRecord,
    files_db: &'a FilesDb,
    source: &'a dyn StorageReader,
    /// Whether the owning Checkpoint has already reached SUCCESS. Only
    /// changes the error reported for a not-yet-packed region: a
    /// SUCCESS chunk that is missing a block is a catalog bug
    /// (`Corruption`), not a caller reading ahead of the packer
    /// (`NotReady`).
    checkpoint_is_success: bool,
}

impl<'a> Chunk<'a> {
    pub fn new(
        record: ChunkRecord,
        files_db: &'a FilesDb,
        source: &'a dyn StorageReader,
        checkpoint_is_success: bool,
    ) -> Self {
        Self {
            record,
            files_db,
            source,
            checkpoint_is_success,
        }
    }

    pub fn ordinal(&self) -> u64 {
        self.record.ordinal
    }

    /// Real length of the chunk (sum of its blocks' lengths); may be less
    /// than `capacity()` when compression shrank the payload.
    pub fn len(&self) -> u64 {
        self.record.real_len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    pub fn capacity(&self) -> u64 {
        self.record.capacity
    }

    pub fn is_finished(&self) -> bool {
        self.record.finished
    }

    pub fn blocks(&self) -> &[FileBlock] {
        &self.record.blocks
    }

    /// Reads `length` bytes starting at `offset`. Returns the bytes read
    /// and whether this is the logical end of the chunk (fewer bytes than
    /// requested because the chunk is shorter, not an error). A
    /// zero-length read always succeeds with an empty, non-EOF result
    /// unless `offset` is already at or past the end.
    pub fn read(&self, offset: u64, length: u64) -> Result<(Vec<u8>, bool), EngineError> {
        let total = self.len();

        if offset >= total {
            return Ok((Vec::new(), true));
        }
        if length == 0 {
            return Ok((Vec::new(), false));
        }

        let end = offset.saturating_add(length).min(total);
        let mut out = Vec::with_capacity((end - offset) as usize);
        let mut pos = offset;

        while pos < end {
            let block = match self.record.block_at(pos) {
                Some(block) => block,
                None if self.checkpoint_is_success => {
                    return Err(EngineError::Corruption(format!(
                        "chunk {} is SUCCESS but offset {pos} has no block",
                        self.record.ordinal
                    )));
                }
                None => return Err(EngineError::NotReady),
            };

            let block_bytes = self.materialize_block(block)?;
            let within = (pos - block.chunk_offset) as usize;
            let take = ((block.chunk_offset + block.length).min(end) - pos) as usize;
            out.extend_from_slice(&block_bytes[within..within + take]);
            pos += take as u64;
        }

        Ok((out, end >= total))
    }

    fn materialize_block(&self, block: &FileBlock) -> Result<Vec<u8>, EngineError> {
        let payload = if block.is_diff {
            let diff = self.files_db.find_diff(&block.path).ok_or_else(|| {
                EngineError::Corruption(format!("no stored diff for {}", block.path))
            })?;
            diff.0
        } else {
            self.source
                .read_file(&block.path, block.source_offset, block.source_length)?
        };

        if self.record.compressed {
            compress_bytes(&payload)
        } else {
            Ok(payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_record::FileBlock;
    use crate::file_record::FileRecord;
    use bpe_api_types::StorageItemAttributes;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapSource(Mutex<HashMap<String, Vec<u8>>>);

    impl StorageReader for MapSource {
        fn read_dir(&self, _path: &str) -> Result<Vec<String>, EngineError> {
            Ok(Vec::new())
        }
        fn file_size(&self, path: &str) -> Result<u64, EngineError> {
            Ok(self.0.lock().unwrap().get(path).map(|v| v.len() as u64).unwrap_or(0))
        }
        fn read_file(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>, EngineError> {
            let map = self.0.lock().unwrap();
            let data = map.get(path).cloned().unwrap_or_default();
            let start = (offset as usize).min(data.len());
            let end = ((offset + length) as usize).min(data.len());
            Ok(data[start..end].to_vec())
        }
        fn read_link(&self, _path: &str) -> Result<String, EngineError> {
            Err(EngineError::bad_param("not a link"))
        }
        fn stat(&self, path: &str) -> Result<StorageItemAttributes, EngineError> {
            let map = self.0.lock().unwrap();
            let data = map.get(path).ok_or_else(|| EngineError::bad_param("no such file"))?;
            Ok(StorageItemAttributes::file(data.len() as u64, 0o644, 0))
        }
    }

    fn two_block_chunk() -> (FilesDb, MapSource, ChunkRecord) {
        let files_db = FilesDb::new();
        files_db.add_file(FileRecord::new("a.txt", StorageItemAttributes::file(3, 0o644, 0)));
        files_db.add_file(FileRecord::new("b.bin", StorageItemAttributes::file(5, 0o644, 0)));
        files_db.set_scan_finish();

        let mut map = HashMap::new();
        map.insert("a.txt".to_string(), b"abc".to_vec());
        map.insert("b.bin".to_string(), b"hello".to_vec());
        let source = MapSource(Mutex::new(map));

        let mut record = ChunkRecord::new(0, 4096, false);
        record.blocks.push(FileBlock {
            path: "a.txt".into(),
            source_offset: 0,
            source_length: 3,
            chunk_offset: 0,
            length: 3,
            is_diff: false,
        });
        record.blocks.push(FileBlock {
            path: "b.bin".into(),
            source_offset: 0,
            source_length: 5,
            chunk_offset: 3,
            length: 5,
            is_diff: false,
        });
        record.finished = true;

        (files_db, source, record)
    }

    #[test]
    fn reads_within_a_single_block() {
        let (files_db, source, record) = two_block_chunk();
        let chunk = Chunk::new(record, &files_db, &source, false);
        let (data, eof) = chunk.read(0, 3).unwrap();
        assert_eq!(data, b"abc");
        assert!(!eof);
    }

    #[test]
    fn reads_across_block_boundary() {
        let (files_db, source, record) = two_block_chunk();
        let chunk = Chunk::new(record, &files_db, &source, false);
        let (data, eof) = chunk.read(1, 5).unwrap();
        assert_eq!(data, b"bchel");
        assert!(!eof);
    }

    #[test]
    fn zero_length_read_is_empty() {
        let (files_db, source, record) = two_block_chunk();
        let chunk = Chunk::new(record, &files_db, &source, false);
        let (data, eof) = chunk.read(0, 0).unwrap();
        assert!(data.is_empty());
        assert!(!eof);
    }

    #[test]
    fn read_past_end_returns_prefix_and_eof() {
        let (files_db, source, record) = two_block_chunk();
        let chunk = Chunk::new(record, &files_db, &source, false);
        let (data, eof) = chunk.read(6, 100).unwrap();
        assert_eq!(data, b"lo");
        assert!(eof);
    }

    #[test]
    fn read_ahead_of_packer_is_not_ready() {
        let (files_db, source, mut record) = two_block_chunk();
        record.blocks.truncate(1);
        record.finished = false;
        let chunk = Chunk::new(record, &files_db, &source, false);
        let err = chunk.read(3, 5).unwrap_err();
        assert!(matches!(err, EngineError::NotReady));
    }
}
