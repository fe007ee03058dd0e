//! A Task binds one Source to one Target under a negotiated mode (spec
//! §4.7): it owns the lock-state lifecycle and the ordered sequence of
//! checkpoints cut from it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bpe_api_types::{CheckpointStatus, CheckpointVersion, DiffAlgorithm, EngineError, LockedStateId, TaskMode};
use bpe_datastore::DiffEngine;
use bpe_source::{SourceLocked, SourceTask};
use bpe_target::TargetTask;

use crate::checkpoint::Checkpoint;

struct LockedState {
    locked_state_id: LockedStateId,
    original_state: String,
    locked_token: String,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("task_mode", &self.task_mode)
            .field("diff_mode", &self.diff_mode)
            .finish_non_exhaustive()
    }
}

pub struct Task {
    task_mode: TaskMode,
    diff_mode: Option<DiffAlgorithm>,
    source_task: Arc<dyn SourceTask>,
    target_task: Arc<dyn TargetTask>,

    next_locked_state_id: Mutex<u64>,
    locked_state: Mutex<Option<LockedState>>,
    next_version: Mutex<u64>,
    checkpoints: Mutex<BTreeMap<u64, Arc<Checkpoint>>>,
}

impl Task {
    pub fn new(
        source_task: Arc<dyn SourceTask>,
        target_task: Arc<dyn TargetTask>,
        task_mode: TaskMode,
        diff_mode: Option<DiffAlgorithm>,
    ) -> Self {
        Self {
            task_mode,
            diff_mode,
            source_task,
            target_task,
            next_locked_state_id: Mutex::new(0),
            locked_state: Mutex::new(None),
            next_version: Mutex::new(0),
            checkpoints: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn task_mode(&self) -> TaskMode {
        self.task_mode
    }

    pub fn diff_mode(&self) -> Option<&DiffAlgorithm> {
        self.diff_mode.as_ref()
    }

    pub fn target_task(&self) -> &Arc<dyn TargetTask> {
        &self.target_task
    }

    /// Re-locks the source, restoring any prior lock first. Spec §4.7:
    /// "a second `lock_source` implicitly unlocks and replaces the prior
    /// one" (S6, forced takeover).
    pub fn lock_source(&self) -> Result<LockedStateId, EngineError> {
        self.unlock_source()?;

        let original_state = self.source_task.original_state()?;
        let locked_token = self.source_task.lock_state(&original_state)?;

        let id = {
            let mut next = self.next_locked_state_id.lock().unwrap();
            *next += 1;
            LockedStateId::new(*next)
        };

        *self.locked_state.lock().unwrap() = Some(LockedState {
            locked_state_id: id,
            original_state,
            locked_token,
        });

        Ok(id)
    }

    pub fn unlock_source(&self) -> Result<(), EngineError> {
        let existing = self.locked_state.lock().unwrap().take();
        if let Some(state) = existing {
            self.source_task.restore_state(&state.original_state)?;
        }
        Ok(())
    }

    pub fn is_source_locked(&self) -> bool {
        self.locked_state.lock().unwrap().is_some()
    }

    fn current_source_locked(&self) -> Option<Arc<dyn SourceLocked>> {
        let guard = self.locked_state.lock().unwrap();
        let state = guard.as_ref()?;
        let boxed = self
            .source_task
            .source_locked(state.locked_state_id, &state.locked_token);
        Some(Arc::from(boxed))
    }

    /// `Task.create_checkpoint` (spec §4.7): allocates the next version,
    /// enforcing the at-most-one-unfinished-checkpoint invariant and, for
    /// delta checkpoints, that the prior checkpoint reached SUCCESS.
    pub fn create_checkpoint(
        &self,
        is_delta: bool,
        diff_engine: Option<Arc<dyn DiffEngine>>,
        compress: bool,
        free_limit: u64,
    ) -> Result<Arc<Checkpoint>, EngineError> {
        let locked_state_id = {
            let guard = self.locked_state.lock().unwrap();
            guard
                .as_ref()
                .map(|s| s.locked_state_id)
                .ok_or_else(|| EngineError::bad_param("create_checkpoint requires a locked source"))?
        };

        let mut checkpoints = self.checkpoints.lock().unwrap();

        if let Some((_, last)) = checkpoints.iter().next_back() {
            if !last.status().is_finished() {
                return Err(EngineError::PriorCheckpointUnfinished);
            }
        }

        let prev_version = if is_delta {
            checkpoints.iter().next_back().map(|(_, cp)| cp.version())
        } else {
            None
        };

        if is_delta {
            if let Some(version) = prev_version {
                let prev = checkpoints.get(&version.as_u64()).expect("prev_version came from this map");
                if prev.status() != CheckpointStatus::Success {
                    return Err(EngineError::bad_param(
                        "delta checkpoint requires the previous checkpoint to be SUCCESS",
                    ));
                }
            } else {
                return Err(EngineError::bad_param("delta checkpoint requires a previous checkpoint"));
            }
        }

        let version = {
            let mut next = self.next_version.lock().unwrap();
            *next += 1;
            CheckpointVersion::new(*next)
        };

        let checkpoint = Checkpoint::new(
            version,
            self.task_mode,
            is_delta,
            prev_version,
            locked_state_id,
            diff_engine,
            compress,
            free_limit,
        );

        if let Some(prev_version) = prev_version {
            let prev_reader = self.target_task.target_checkpoint(prev_version)?;
            checkpoint.set_prev_reader(Arc::from(prev_reader));
        }

        if let Some(source_locked) = self.current_source_locked() {
            if let Err(e) = checkpoint.prepare_source(source_locked) {
                checkpoints.insert(version.as_u64(), Arc::clone(&checkpoint));
                return Err(e);
            }
        }

        checkpoints.insert(version.as_u64(), Arc::clone(&checkpoint));
        Ok(checkpoint)
    }

    pub fn checkpoint(&self, version: CheckpointVersion) -> Option<Arc<Checkpoint>> {
        self.checkpoints.lock().unwrap().get(&version.as_u64()).cloned()
    }

    pub fn last_checkpoint(&self) -> Option<Arc<Checkpoint>> {
        self.checkpoints
            .lock()
            .unwrap()
            .iter()
            .next_back()
            .map(|(_, cp)| Arc::clone(cp))
    }
}
