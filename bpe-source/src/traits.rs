use std::time::Duration;

use bpe_api_types::{DiffAlgorithm, EngineError, LockedStateId, TaskMode};
use bpe_datastore::{FilesDb, StorageReader};

/// A registered backup source: a factory for `SourceTask`s bound to a
/// `source_param` whose meaning is source-specific (a filesystem path for
/// `LocalDirSource`, opaque metadata for a remote source).
pub trait Source: Send + Sync {
    fn output_modes(&self) -> &[TaskMode];

    fn supported_diffs(&self) -> &[DiffAlgorithm];

    fn create_task(&self, source_param: String) -> Box<dyn SourceTask>;
}

/// Per-task handle to a Source. Every method here maps to one RPC call in
/// the real deployment (spec §6); `LocalDirSource` implements them
/// in-process instead of over the wire.
pub trait SourceTask: Send + Sync {
    /// Opaque token describing the source's current logical state.
    fn original_state(&self) -> Result<String, EngineError>;

    /// Atomically enters locked mode; the returned token is private to the
    /// implementation (a snapshot id, a staging path, ...).
    fn lock_state(&self, original_state: &str) -> Result<String, EngineError>;

    /// Releases the lock taken by `lock_state`, restoring the source to
    /// its pre-lock externally observable state.
    fn restore_state(&self, original_state: &str) -> Result<(), EngineError>;

    /// View-handle over the frozen state identified by `locked_token`.
    fn source_locked(
        &self,
        locked_state_id: LockedStateId,
        locked_token: &str,
    ) -> Box<dyn SourceLocked>;
}

/// Frozen view of a locked Source: a `StorageReader` plus the scan control
/// surface the chunk pipeline polls.
pub trait SourceLocked: StorageReader {
    /// Starts the source-side enumeration pipeline (the scan that fills
    /// `files_db`). Non-blocking: returns once the scan worker has been
    /// spawned, as `LocalDirSource` does.
    fn prepare(&self, files_db: std::sync::Arc<FilesDb>) -> Result<(), EngineError>;

    /// Upcast to the `StorageReader` supertrait through a concrete impl.
    /// Needed because the chunk pipeline only ever holds a
    /// `dyn SourceLocked` and still needs a `&dyn StorageReader` out of it.
    fn as_storage_reader(&self) -> &dyn StorageReader;

    fn is_files_scan_finish(&self) -> bool;

    /// Blocks until `files_db` grows, the scan finishes, or `timeout`
    /// elapses.
    fn wait_new_file(&self, timeout: Duration) -> bool;

    /// Cooperative cancellation: the scan thread must stop producing
    /// further side effects at its next suspension point.
    fn stop(&self);
}
