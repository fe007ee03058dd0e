use std::sync::Mutex;

use bpe_api_types::EngineError;

use crate::chunk_record::{ChunkRecord, FileBlock};

/// Per-Checkpoint catalog of allocated chunks, in allocation order.
pub struct ChunksDb {
    inner: Mutex<Vec<ChunkRecord>>,
}

impl Default for ChunksDb {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunksDb {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub fn add_new_chunk(&self, capacity: u64, compressed: bool) -> ChunkRecord {
        let mut chunks = self.inner.lock().unwrap();
        let ordinal = chunks.len() as u64;
        let chunk = ChunkRecord::new(ordinal, capacity, compressed);
        chunks.push(chunk.clone());
        chunk
    }

    pub fn add_file_block(&self, ordinal: u64, block: FileBlock) -> Result<(), EngineError> {
        let mut chunks = self.inner.lock().unwrap();
        let chunk = chunks
            .get_mut(ordinal as usize)
            .ok_or_else(|| EngineError::Corruption(format!("no such chunk {ordinal}")))?;
        if chunk.finished {
            return Err(EngineError::Corruption(format!(
                "attempt to append to finished chunk {ordinal}"
            )));
        }
        chunk.blocks.push(block);
        Ok(())
    }

    pub fn set_finish(&self, ordinal: u64) -> Result<(), EngineError> {
        let mut chunks = self.inner.lock().unwrap();
        let chunk = chunks
            .get_mut(ordinal as usize)
            .ok_or_else(|| EngineError::Corruption(format!("no such chunk {ordinal}")))?;
        chunk.finished = true;
        Ok(())
    }

    pub fn set_uploaded(&self, ordinal: u64) -> Result<(), EngineError> {
        let mut chunks = self.inner.lock().unwrap();
        let chunk = chunks
            .get_mut(ordinal as usize)
            .ok_or_else(|| EngineError::Corruption(format!("no such chunk {ordinal}")))?;
        if !chunk.finished {
            return Err(EngineError::Corruption(format!(
                "attempt to upload unfinished chunk {ordinal}"
            )));
        }
        chunk.uploaded = true;
        Ok(())
    }

    pub fn get(&self, ordinal: u64) -> Option<ChunkRecord> {
        self.inner.lock().unwrap().get(ordinal as usize).cloned()
    }

    /// All chunks, in allocation order.
    pub fn list(&self) -> Vec<ChunkRecord> {
        self.inner.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all_uploaded(&self) -> bool {
        self.inner.lock().unwrap().iter().all(|c| c.uploaded)
    }
}
