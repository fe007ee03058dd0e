//! The central state machine (spec §4.5/§4.6): one versioned snapshot of
//! work, the chunk pipeline that packs it, and the cancellation protocol
//! that lets a caller stop and later resume it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bpe_api_types::{
    CheckpointStatus, CheckpointVersion, EngineError, LockedStateId, TaskMode, TransferOutcome,
};
use bpe_datastore::{Chunk, ChunkData, ChunkPacker, ChunkSource, ChunksDb, DiffEngine, FilesDb, StorageReader};
use bpe_source::SourceLocked;
use bpe_target::TargetCheckpoint;
use bpe_tools::wait::Notifier;

/// How long `transfer()` is willing to block waiting for the target
/// worker to drain the chunk stream before giving up and failing the
/// checkpoint. Generous on purpose: the actual bound in production is the
/// caller's own timeout, not this one.
const TARGET_DRAIN_TIMEOUT: Duration = Duration::from_secs(3600);

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("version", &self.version)
            .field("task_mode", &self.task_mode)
            .field("is_delta", &self.is_delta)
            .field("prev_version", &self.prev_version)
            .field("locked_state_id", &self.locked_state_id)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

pub struct Checkpoint {
    version: CheckpointVersion,
    task_mode: TaskMode,
    is_delta: bool,
    prev_version: Option<CheckpointVersion>,
    locked_state_id: LockedStateId,

    diff_engine: Option<Arc<dyn DiffEngine>>,
    compress: bool,
    free_limit: u64,

    files_db: Arc<FilesDb>,
    chunks_db: Arc<ChunksDb>,

    status: Mutex<CheckpointStatus>,
    status_notifier: Notifier,
    last_error: Mutex<Option<String>>,

    source_locked: Mutex<Option<Arc<dyn SourceLocked>>>,
    /// Previous checkpoint's restore view, used as the diff base for delta
    /// checkpoints. `None` for full backups or when there is no usable
    /// prior version. Kept as a `TargetCheckpoint` (not a bare
    /// `StorageReader`) so obtaining it never needs a `dyn` supertrait
    /// upcast, only the same `as_storage_reader()` indirection used
    /// everywhere else in this pipeline.
    prev_reader: Mutex<Option<Arc<dyn TargetCheckpoint>>>,
    target_checkpoint: Mutex<Option<Arc<dyn TargetCheckpoint>>>,

    /// Set once `SourceLocked::prepare` has actually been invoked, so a
    /// resumed Checkpoint does not re-trigger the scan and duplicate
    /// `files_db` entries.
    prepared: AtomicBool,
    stop_flag: Arc<AtomicBool>,
}

impl Checkpoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: CheckpointVersion,
        task_mode: TaskMode,
        is_delta: bool,
        prev_version: Option<CheckpointVersion>,
        locked_state_id: LockedStateId,
        diff_engine: Option<Arc<dyn DiffEngine>>,
        compress: bool,
        free_limit: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            version,
            task_mode,
            is_delta,
            prev_version,
            locked_state_id,
            diff_engine,
            compress,
            free_limit,
            files_db: Arc::new(FilesDb::new()),
            chunks_db: Arc::new(ChunksDb::new()),
            status: Mutex::new(CheckpointStatus::Standby),
            status_notifier: Notifier::new(),
            last_error: Mutex::new(None),
            source_locked: Mutex::new(None),
            prev_reader: Mutex::new(None),
            target_checkpoint: Mutex::new(None),
            prepared: AtomicBool::new(false),
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn version(&self) -> CheckpointVersion {
        self.version
    }

    pub fn task_mode(&self) -> TaskMode {
        self.task_mode
    }

    pub fn is_delta(&self) -> bool {
        self.is_delta
    }

    pub fn prev_version(&self) -> Option<CheckpointVersion> {
        self.prev_version
    }

    pub fn locked_state_id(&self) -> LockedStateId {
        self.locked_state_id
    }

    pub fn status(&self) -> CheckpointStatus {
        *self.status.lock().unwrap()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    pub fn files_db(&self) -> &Arc<FilesDb> {
        &self.files_db
    }

    pub fn chunks_db(&self) -> &Arc<ChunksDb> {
        &self.chunks_db
    }

    /// The diff base for delta checkpoints: the prior checkpoint's restore
    /// view. Set once, before the first `transfer()`/`prepare_source()`.
    pub fn set_prev_reader(&self, reader: Arc<dyn TargetCheckpoint>) {
        *self.prev_reader.lock().unwrap() = Some(reader);
    }

    /// Blocks until the status changes from `since` or `timeout` elapses;
    /// returns the status observed on return. Mirrors the suspension point
    /// named `Checkpoint.wait_status` in spec §5.
    pub fn wait_for_status_change(&self, since: CheckpointStatus, timeout: Duration) -> CheckpointStatus {
        let generation = self.status_notifier.current_generation();
        self.status_notifier
            .wait_for_change(generation, timeout, || self.status() != since);
        self.status()
    }

    fn set_status(&self, status: CheckpointStatus) {
        *self.status.lock().unwrap() = status;
        self.status_notifier.bump();
    }

    fn fail(&self, msg: impl Into<String>) {
        let msg = msg.into();
        log::warn!("checkpoint {} failed: {msg}", self.version);
        *self.last_error.lock().unwrap() = Some(msg);
        self.set_status(CheckpointStatus::Failed);
    }

    /// Binds the `SourceLocked` this checkpoint was cut from and, the
    /// first time this is called, starts its scan. Idempotent on repeat
    /// calls (resume after `stop()` does not re-scan).
    fn start_source(&self, source_locked: Arc<dyn SourceLocked>) -> Result<(), EngineError> {
        self.stop_flag.store(false, Ordering::SeqCst);
        *self.source_locked.lock().unwrap() = Some(Arc::clone(&source_locked));

        if self.prepared.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        source_locked.prepare(Arc::clone(&self.files_db))
    }

    /// `STANDBY, STOPPED, FAILED -> PREPARING -> PREPARE_STARTED` (spec
    /// §4.5). Can be called ahead of `transfer()` to warm up the source
    /// scan without yet committing to a target.
    pub fn prepare_source(&self, source_locked: Arc<dyn SourceLocked>) -> Result<(), EngineError> {
        let status = self.status();
        if !status.can_restart() {
            return Err(EngineError::invalid_status(format!(
                "prepare_source is invalid from status {status}"
            )));
        }

        self.set_status(CheckpointStatus::Preparing);
        match self.start_source(source_locked) {
            Ok(()) => {
                self.set_status(CheckpointStatus::PrepareStarted);
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Drives the checkpoint to completion against `target_checkpoint`.
    /// Returns immediately with a symbolic result (spec §4.5); the real
    /// outcome is always readable afterwards via `status()`.
    pub fn transfer(self: &Arc<Self>, target_checkpoint: Arc<dyn TargetCheckpoint>) -> TransferOutcome {
        let status = self.status();
        match status {
            CheckpointStatus::Starting | CheckpointStatus::SourceStarted | CheckpointStatus::Start => {
                return TransferOutcome::Pending;
            }
            CheckpointStatus::Success => return TransferOutcome::Ok,
            CheckpointStatus::Stopping | CheckpointStatus::SourceStopped | CheckpointStatus::TargetStopped => {
                return TransferOutcome::InvalidStatus;
            }
            _ => {}
        }

        if status.can_restart() {
            self.set_status(CheckpointStatus::Starting);
            let source_locked = self.source_locked.lock().unwrap().clone();
            let source_locked = match source_locked {
                Some(sl) => sl,
                None => {
                    self.fail("transfer() called before a source was locked for this checkpoint");
                    return TransferOutcome::Ok;
                }
            };
            if let Err(e) = self.start_source(source_locked) {
                self.fail(e.to_string());
                return TransferOutcome::Ok;
            }
        }

        self.set_status(CheckpointStatus::SourceStarted);
        *self.target_checkpoint.lock().unwrap() = Some(Arc::clone(&target_checkpoint));
        self.set_status(CheckpointStatus::Start);

        let chunk_source: Arc<dyn ChunkSource> = self.clone();
        if let Err(e) = target_checkpoint.transfer(chunk_source) {
            self.fail(e.to_string());
            return TransferOutcome::Ok;
        }

        match target_checkpoint.wait_finished(TARGET_DRAIN_TIMEOUT) {
            Some(Ok(())) => self.set_status(CheckpointStatus::Success),
            Some(Err(e)) => self.fail(e.to_string()),
            None => self.fail("target worker timed out waiting for upload completion"),
        }

        TransferOutcome::Ok
    }

    /// `STOPPING -> SOURCE_STOPPED (source worker joined) -> TARGET_STOPPED
    /// (target worker joined) -> STOPPED` (spec §5). No-op on a checkpoint
    /// that has not started or has already reached a terminal/stopped
    /// state.
    pub fn stop(&self) {
        let status = self.status();
        if status == CheckpointStatus::Standby || status.is_terminal() || status == CheckpointStatus::Stopped {
            return;
        }

        self.stop_flag.store(true, Ordering::SeqCst);
        self.set_status(CheckpointStatus::Stopping);

        if let Some(source_locked) = self.source_locked.lock().unwrap().clone() {
            source_locked.stop();
        }
        self.set_status(CheckpointStatus::SourceStopped);

        if let Some(target_checkpoint) = self.target_checkpoint.lock().unwrap().clone() {
            target_checkpoint.stop();
        }
        self.set_status(CheckpointStatus::TargetStopped);

        self.set_status(CheckpointStatus::Stopped);
    }
}

impl ChunkSource for Checkpoint {
    /// `Checkpoint.next_chunk` (spec §4.6): packs and materializes the next
    /// chunk, blocking on `files_db.wait_new_file` when the packer has
    /// drained the catalog but the scan is still running.
    fn next_chunk(&self, capacities: &[u64]) -> Result<Option<ChunkData>, EngineError> {
        let source_locked = self
            .source_locked
            .lock()
            .unwrap()
            .clone()
            .ok_or(EngineError::NotReady)?;
        let prev_reader = self.prev_reader.lock().unwrap().clone();
        let stop_flag = Arc::clone(&self.stop_flag);
        let files_db = Arc::clone(&self.files_db);

        let packer = ChunkPacker {
            files_db: self.files_db.as_ref(),
            chunks_db: self.chunks_db.as_ref(),
            diff_engine: self.diff_engine.as_deref(),
            is_delta: self.is_delta,
            compress: self.compress,
            free_limit: self.free_limit,
        };

        let prev_reader = prev_reader.as_deref().map(|tc| tc.as_storage_reader());
        let record = packer.pack_next(
            capacities,
            source_locked.as_storage_reader(),
            prev_reader,
            move || {
                if stop_flag.load(Ordering::SeqCst) {
                    return false;
                }
                files_db.wait_new_file(Duration::from_millis(500))
            },
        )?;

        let record = match record {
            Some(record) => record,
            None => return Ok(None),
        };

        let is_success = self.status() == CheckpointStatus::Success;
        let chunk = Chunk::new(record.clone(), &self.files_db, source_locked.as_storage_reader(), is_success);
        let (bytes, _eof) = chunk.read(0, record.real_len())?;

        Ok(Some(ChunkData {
            ordinal: record.ordinal,
            bytes,
            blocks: record.blocks.clone(),
            compressed: record.compressed,
        }))
    }
}
