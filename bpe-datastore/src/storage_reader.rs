use bpe_api_types::{EngineError, StorageItemAttributes};

/// Read-only, path-addressed view over a tree of items.
///
/// Implemented by `SourceLocked` (the frozen view of a locked Source) and
/// by `TargetCheckpoint` (so the restore direction, which reads from the
/// Target and writes to a Source-like destination, reuses the same trait).
/// Paths are always relative to the view's root and use `/` as separator,
/// regardless of the host platform.
pub trait StorageReader: Send + Sync {
    /// Lists the direct children of a directory, relative to the view's
    /// root. The root directory is addressed by the empty path `""`.
    fn read_dir(&self, path: &str) -> Result<Vec<String>, EngineError>;

    fn file_size(&self, path: &str) -> Result<u64, EngineError>;

    /// Reads up to `length` bytes starting at `offset`. Returns fewer bytes
    /// than requested only at end-of-file.
    fn read_file(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>, EngineError>;

    fn read_link(&self, path: &str) -> Result<String, EngineError>;

    fn stat(&self, path: &str) -> Result<StorageItemAttributes, EngineError>;
}
