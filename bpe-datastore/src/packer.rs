use bpe_api_types::{EngineError, StorageItemKind};

use crate::chunk_record::{ChunkRecord, FileBlock};
use crate::chunks_db::ChunksDb;
use crate::diff::DiffEngine;
use crate::file_record::FileRecord;
use crate::files_db::FilesDb;
use crate::storage_reader::StorageReader;

/// Default headroom (bytes) below which a chunk is considered full and is
/// closed rather than accepting one more file-block. Individual packers
/// may override it (the S1 end-to-end scenario in the test suite uses
/// `FREE_LIMIT = 0` to force exactly one chunk per run).
pub const FREE_LIMIT: u64 = 64 * 1024;

/// Drives the packing half of spec §4.6: pulls unpacked files off
/// `files_db` in insertion order, diffing and/or compressing them as
/// configured, and appends them to `chunks_db` as file-blocks until the
/// chunk is full or the source scan has finished.
pub struct ChunkPacker<'a> {
    pub files_db: &'a FilesDb,
    pub chunks_db: &'a ChunksDb,
    pub diff_engine: Option<&'a dyn DiffEngine>,
    pub is_delta: bool,
    pub compress: bool,
    pub free_limit: u64,
}

impl<'a> ChunkPacker<'a> {
    pub fn new(files_db: &'a FilesDb, chunks_db: &'a ChunksDb) -> Self {
        Self {
            files_db,
            chunks_db,
            diff_engine: None,
            is_delta: false,
            compress: false,
            free_limit: FREE_LIMIT,
        }
    }

    fn choose_capacity(capacities: &[u64]) -> u64 {
        capacities.iter().copied().max().unwrap_or(4 * 1024 * 1024)
    }

    /// Packs and closes the next chunk, or returns `Ok(None)` once the
    /// source scan has finished and no unpacked files remain (end of
    /// stream). `wait_for_more` is called whenever the packer has drained
    /// `files_db` but the scan is still running; it should block until new
    /// files arrive (or a bounded timeout) and return `false` if the
    /// caller wants packing to give up (e.g. the Checkpoint is stopping).
    pub fn pack_next(
        &self,
        capacities: &[u64],
        source: &dyn StorageReader,
        prev_reader: Option<&dyn StorageReader>,
        mut wait_for_more: impl FnMut() -> bool,
    ) -> Result<Option<ChunkRecord>, EngineError> {
        loop {
            if !self.files_db.list_unpack_files().is_empty() {
                break;
            }
            if self.files_db.is_scan_finish() {
                return Ok(None);
            }
            if !wait_for_more() {
                return Ok(None);
            }
        }

        let capacity = Self::choose_capacity(capacities);
        let chunk = self.chunks_db.add_new_chunk(capacity, self.compress);
        let ordinal = chunk.ordinal;
        let mut chunk_offset = 0u64;

        'outer: loop {
            let files = self.files_db.list_unpack_files();

            if files.is_empty() {
                if self.files_db.is_scan_finish() {
                    break 'outer;
                }
                if !wait_for_more() {
                    break 'outer;
                }
                continue 'outer;
            }

            for file in files {
                if capacity.saturating_sub(chunk_offset) < self.free_limit {
                    break 'outer;
                }

                if file.kind() != StorageItemKind::File {
                    self.files_db.mark_packed(&file.path)?;
                    continue;
                }

                let (payload, is_diff) = self.materialize(&file, source, prev_reader)?;
                let length = payload.len() as u64;

                self.chunks_db.add_file_block(
                    ordinal,
                    FileBlock {
                        path: file.path.clone(),
                        source_offset: 0,
                        source_length: file.attributes.size,
                        chunk_offset,
                        length,
                        is_diff,
                    },
                )?;
                self.files_db.mark_packed(&file.path)?;
                chunk_offset += length;
            }

            if capacity.saturating_sub(chunk_offset) < self.free_limit {
                break 'outer;
            }
            if self.files_db.is_scan_finish() && self.files_db.list_unpack_files().is_empty() {
                break 'outer;
            }
        }

        self.chunks_db.set_finish(ordinal)?;
        Ok(Some(self.chunks_db.get(ordinal).ok_or_else(|| {
            EngineError::Corruption(format!("chunk {ordinal} vanished after packing"))
        })?))
    }

    /// Produces the bytes a file-block should carry: the raw file content,
    /// or (for delta checkpoints) a diff against the previous version,
    /// compressed afterwards if `self.compress`.
    fn materialize(
        &self,
        file: &FileRecord,
        source: &dyn StorageReader,
        prev_reader: Option<&dyn StorageReader>,
    ) -> Result<(Vec<u8>, bool), EngineError> {
        let raw = source.read_file(&file.path, 0, file.attributes.size)?;

        let (payload, is_diff) = if self.is_delta {
            if let Some(existing) = self.files_db.find_diff(&file.path) {
                (existing.0, true)
            } else {
                let diff_engine = self.diff_engine.ok_or_else(|| {
                    EngineError::bad_param("delta checkpoint without a negotiated diff algorithm")
                })?;
                let old = match prev_reader {
                    Some(reader) => match reader.stat(&file.path) {
                        Ok(_) => reader.read_file(&file.path, 0, u64::MAX).unwrap_or_default(),
                        Err(_) => Vec::new(),
                    },
                    None => Vec::new(),
                };
                let diff = diff_engine.diff(&old, &raw)?;
                self.files_db.add_file_diff(&file.path, diff.clone())?;
                (diff.0, true)
            }
        } else {
            (raw, false)
        };

        let payload = if self.compress {
            compress_bytes(&payload)?
        } else {
            payload
        };

        Ok((payload, is_diff))
    }
}

pub fn compress_bytes(data: &[u8]) -> Result<Vec<u8>, EngineError> {
    use std::io::Write;
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| EngineError::Other(e.into()))?;
    encoder.finish().map_err(|e| EngineError::Other(e.into()))
}

pub fn decompress_bytes(data: &[u8]) -> Result<Vec<u8>, EngineError> {
    use std::io::Read;
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EngineError::Other(e.into()))?;
    Ok(out)
}
