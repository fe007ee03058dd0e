use bpe_api_types::EngineError;

use crate::chunk_record::FileBlock;

/// Chunk payload handed across the Checkpoint/Target boundary.
///
/// `Chunk::read` is lazy and borrow-heavy (it re-derives bytes from a
/// `StorageReader` on demand); by the time a chunk is ready to hand to a
/// Target worker the Checkpoint has already fully materialized it, so the
/// boundary itself only deals in owned bytes. `blocks`/`compressed` are
/// carried alongside the bytes so a Target can index file locations for its
/// own restore-direction `StorageReader` without reaching back into
/// `files_db`/`chunks_db`, which it has no access to.
#[derive(Debug, Clone)]
pub struct ChunkData {
    pub ordinal: u64,
    pub bytes: Vec<u8>,
    pub blocks: Vec<FileBlock>,
    pub compressed: bool,
}

/// Pull side of the chunk pipeline, implemented by a Checkpoint and
/// consumed by a `TargetCheckpoint`'s upload worker. Returns `Ok(None)`
/// once the source scan is finished and no chunk remains to pack.
pub trait ChunkSource: Send + Sync {
    fn next_chunk(&self, capacities: &[u64]) -> Result<Option<ChunkData>, EngineError>;
}
