//! Top-level registry (spec §4.1): owns registered Sources/Targets, creates
//! Tasks by negotiating a common mode, and exposes the small set of
//! operations a caller drives a Task through.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bpe_api_types::{EngineError, IdAllocator, SourceId, TargetId, TaskId, TransferOutcome};
use bpe_api_types::{DiffAlgorithm, TaskMode};
use bpe_source::Source;
use bpe_target::Target;

use crate::task::Task;

#[derive(Debug, Clone)]
pub struct TaskStatusSnapshot {
    pub task_mode: TaskMode,
    pub source_locked: bool,
    pub last_checkpoint: Option<CheckpointSnapshot>,
}

#[derive(Debug, Clone)]
pub struct CheckpointSnapshot {
    pub version: bpe_api_types::CheckpointVersion,
    pub status: bpe_api_types::CheckpointStatus,
    pub last_error: Option<String>,
}

pub struct Engine {
    sources: Mutex<HashMap<u64, Arc<dyn Source>>>,
    targets: Mutex<HashMap<u64, Arc<dyn Target>>>,
    tasks: Mutex<HashMap<u64, Arc<Task>>>,
    next_source: Mutex<IdAllocator>,
    next_target: Mutex<IdAllocator>,
    next_task: Mutex<IdAllocator>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            targets: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            next_source: Mutex::new(IdAllocator::new()),
            next_target: Mutex::new(IdAllocator::new()),
            next_task: Mutex::new(IdAllocator::new()),
        }
    }

    pub fn register_source(&self, source: Arc<dyn Source>) -> SourceId {
        let id = self.next_source.lock().unwrap().alloc();
        self.sources.lock().unwrap().insert(id, source);
        SourceId::new(id)
    }

    pub fn register_target(&self, target: Arc<dyn Target>) -> TargetId {
        let id = self.next_target.lock().unwrap().alloc();
        self.targets.lock().unwrap().insert(id, target);
        TargetId::new(id)
    }

    /// `Engine.create_task` (spec §4.1/§4.7): negotiates a task mode and
    /// diff algorithm between the two endpoints, failing with
    /// `IncompatibleModes` when they share none.
    pub fn create_task(
        &self,
        source_id: SourceId,
        source_param: String,
        target_id: TargetId,
        target_param: String,
    ) -> Result<(TaskId, Arc<Task>), EngineError> {
        let source = self
            .sources
            .lock()
            .unwrap()
            .get(&source_id.as_u64())
            .cloned()
            .ok_or(EngineError::UnknownEndpoint(source_id.as_u64()))?;
        let target = self
            .targets
            .lock()
            .unwrap()
            .get(&target_id.as_u64())
            .cloned()
            .ok_or(EngineError::UnknownEndpoint(target_id.as_u64()))?;

        let task_mode = TaskMode::negotiate(source.output_modes(), target.accept_modes())
            .ok_or(EngineError::IncompatibleModes)?;
        let diff_mode: Option<DiffAlgorithm> =
            DiffAlgorithm::negotiate(source.supported_diffs(), target.supported_diffs());

        let source_task = Arc::from(source.create_task(source_param));
        let target_task = Arc::from(target.create_task(target_param));

        let task = Arc::new(Task::new(source_task, target_task, task_mode, diff_mode));

        let id = self.next_task.lock().unwrap().alloc();
        self.tasks.lock().unwrap().insert(id, Arc::clone(&task));

        Ok((TaskId::new(id), task))
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<Arc<Task>> {
        self.tasks.lock().unwrap().get(&task_id.as_u64()).cloned()
    }

    /// Drives the task's last checkpoint towards completion, resuming a
    /// previously stopped checkpoint's source/target workers in place.
    pub fn resume_backup_task(&self, task_id: TaskId) -> Result<TransferOutcome, EngineError> {
        let task = self
            .get_task(task_id)
            .ok_or(EngineError::UnknownEndpoint(task_id.as_u64()))?;
        let checkpoint = task
            .last_checkpoint()
            .ok_or_else(|| EngineError::bad_param("task has no checkpoint to resume"))?;

        let target_checkpoint = task.target_task().target_checkpoint(checkpoint.version())?;
        Ok(checkpoint.transfer(Arc::from(target_checkpoint)))
    }

    /// `Task.stop` (spec §5): cooperatively cancels the task's in-progress
    /// checkpoint, if any.
    pub fn pause_backup_task(&self, task_id: TaskId) -> Result<(), EngineError> {
        let task = self
            .get_task(task_id)
            .ok_or(EngineError::UnknownEndpoint(task_id.as_u64()))?;
        if let Some(checkpoint) = task.last_checkpoint() {
            checkpoint.stop();
        }
        Ok(())
    }

    pub fn delete_backup_task(&self, task_id: TaskId) -> Result<(), EngineError> {
        let task = self
            .tasks
            .lock()
            .unwrap()
            .remove(&task_id.as_u64())
            .ok_or(EngineError::UnknownEndpoint(task_id.as_u64()))?;
        if let Some(checkpoint) = task.last_checkpoint() {
            checkpoint.stop();
        }
        task.unlock_source()
    }

    pub fn get_backup_task_status(&self, task_id: TaskId) -> Result<TaskStatusSnapshot, EngineError> {
        let task = self
            .get_task(task_id)
            .ok_or(EngineError::UnknownEndpoint(task_id.as_u64()))?;

        Ok(TaskStatusSnapshot {
            task_mode: task.task_mode(),
            source_locked: task.is_source_locked(),
            last_checkpoint: task.last_checkpoint().map(|cp| CheckpointSnapshot {
                version: cp.version(),
                status: cp.status(),
                last_error: cp.last_error(),
            }),
        })
    }
}
