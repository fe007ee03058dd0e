//! Logical catalogs (`files_db`, `chunks_db`) and the chunk packing/reading
//! pipeline that sits between a locked Source view and a Target upload
//! worker.
//!
//! Persistence is out of scope here (spec §1): everything below is an
//! in-memory, thread-safe catalog. A production deployment would back
//! these with an on-disk store, but the logical operations and their
//! ordering guarantees are exactly what callers depend on.

pub mod chunk;
pub mod chunk_record;
pub mod chunk_source;
pub mod chunks_db;
pub mod diff;
pub mod file_record;
pub mod files_db;
pub mod packer;
pub mod storage_reader;

pub use chunk::Chunk;
pub use chunk_record::{ChunkRecord, FileBlock};
pub use chunk_source::{ChunkData, ChunkSource};
pub use chunks_db::ChunksDb;
pub use diff::{DiffEngine, NaiveDiff};
pub use file_record::FileRecord;
pub use files_db::FilesDb;
pub use packer::{ChunkPacker, FREE_LIMIT};
pub use storage_reader::StorageReader;
