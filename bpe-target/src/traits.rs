use std::sync::Arc;

use bpe_api_types::{CheckpointVersion, DiffAlgorithm, EngineError, TaskMode};
use bpe_datastore::{ChunkSource, StorageReader};

/// Per-item placement the target assigned during `fill_target_meta`, plus
/// whatever the engine already knew about the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointMetaItem {
    pub path: String,
    pub size: u64,
    /// Opaque placement token (sector id, object key, ...) filled in by
    /// `fill_target_meta`; empty until then.
    pub placement: String,
}

/// Checkpoint-wide manifest exchanged with a fill-meta style Target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointMeta {
    pub version: CheckpointVersion,
    pub task_mode: TaskMode,
    pub items: Vec<CheckpointMetaItem>,
}

impl CheckpointMeta {
    pub fn new(version: CheckpointVersion, task_mode: TaskMode, items: Vec<CheckpointMetaItem>) -> Self {
        Self { version, task_mode, items }
    }
}

/// A registered backup target: a factory for `TargetTask`s bound to a
/// `target_param` whose meaning is target-specific (a filesystem path for
/// `LocalFolderTarget`, opaque connection info for a remote target).
pub trait Target: Send + Sync {
    fn accept_modes(&self) -> &[TaskMode];

    fn supported_diffs(&self) -> &[DiffAlgorithm];

    fn create_task(&self, target_param: String) -> Box<dyn TargetTask>;
}

/// Per-task handle to a Target. Mirrors `SourceTask`'s role on the other
/// side of the pipeline; every method maps to one RPC call in a real
/// deployment (spec §6).
///
/// Two flavors of checkpoint creation are offered; a concrete Target
/// implements whichever flavor its task mode requires and leaves the
/// other at its default (`BadParam`, "flavor not supported").
pub trait TargetTask: Send + Sync {
    fn get_last_check_point(&self, source_entity_id: &str) -> Result<Option<CheckpointVersion>, EngineError>;

    fn create_new_check_point(
        &self,
        entity_id: &str,
        task_mode: TaskMode,
        version: CheckpointVersion,
    ) -> Result<(), EngineError>;

    fn finish_check_point(&self, version: CheckpointVersion) -> Result<(), EngineError>;

    /// Fill-meta flavor: target-side allocation given the full per-item
    /// manifest up front (e.g. sector-based stores that must pre-allocate
    /// placement before any bytes move).
    fn fill_target_meta(
        &self,
        _meta: CheckpointMeta,
    ) -> Result<(CheckpointMeta, Vec<u8>), EngineError> {
        Err(EngineError::bad_param("fill-meta flavor not supported by this target"))
    }

    fn target_checkpoint_from_filled_meta(
        &self,
        _meta: CheckpointMeta,
        _target_meta: Vec<u8>,
    ) -> Result<Box<dyn TargetCheckpoint>, EngineError> {
        Err(EngineError::bad_param("fill-meta flavor not supported by this target"))
    }

    /// Streaming flavor: the target pulls chunks on its own schedule
    /// through the `ChunkSource` handed to `TargetCheckpoint::transfer`.
    fn target_checkpoint(
        &self,
        _version: CheckpointVersion,
    ) -> Result<Box<dyn TargetCheckpoint>, EngineError> {
        Err(EngineError::bad_param("streaming flavor not supported by this target"))
    }
}

/// Target-side handle to one checkpoint's upload, plus (for the restore
/// direction) a read-only view over what was uploaded.
pub trait TargetCheckpoint: StorageReader {
    /// Spawns the upload worker consuming `chunks` until it is exhausted,
    /// then marks the checkpoint as finished on the target side. Returns
    /// once the worker has been started; call `wait_finished` to block for
    /// completion.
    fn transfer(&self, chunks: Arc<dyn ChunkSource>) -> Result<(), EngineError>;

    fn is_finished(&self) -> bool;

    /// Blocks until the upload worker finishes or `timeout` elapses,
    /// returning the terminal result if it has one yet.
    fn wait_finished(&self, timeout: std::time::Duration) -> Option<Result<(), EngineError>>;

    /// Cooperative cancellation, mirroring `SourceLocked::stop`. Idempotent:
    /// calling it on an already-stopped or already-finished checkpoint is a
    /// no-op.
    fn stop(&self);

    /// Upcast to the `StorageReader` supertrait through a concrete impl, for
    /// the same reason `SourceLocked::as_storage_reader` exists.
    fn as_storage_reader(&self) -> &dyn StorageReader;
}
