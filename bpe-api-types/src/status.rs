use std::fmt;

/// Status of a [`Checkpoint`](../backup_engine/checkpoint/struct.Checkpoint.html).
///
/// `Standby` is the initial state, `Success`/`Failed` are terminal,
/// `Stopped` is re-entrant (a stopped checkpoint can be resumed by calling
/// `prepare_source`/`transfer` again).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CheckpointStatus {
    Standby,
    Preparing,
    PrepareStarted,
    Starting,
    SourceStarted,
    Start,
    Stopping,
    SourceStopped,
    TargetStopped,
    Stopped,
    Success,
    Failed,
}

impl CheckpointStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CheckpointStatus::Success | CheckpointStatus::Failed)
    }

    /// True for states counted by the "at most one unfinished Checkpoint"
    /// invariant (spec §3): SUCCESS, FAILED, and STOPPED are considered
    /// finished for that purpose even though STOPPED is resumable.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            CheckpointStatus::Success | CheckpointStatus::Failed | CheckpointStatus::Stopped
        )
    }

    /// True once a SourceLocked has necessarily been bound (status >=
    /// SOURCE_STARTED in the spec's partial order over the happy path).
    pub fn has_source_locked(self) -> bool {
        matches!(
            self,
            CheckpointStatus::SourceStarted
                | CheckpointStatus::Start
                | CheckpointStatus::Stopping
                | CheckpointStatus::SourceStopped
                | CheckpointStatus::TargetStopped
                | CheckpointStatus::Stopped
                | CheckpointStatus::Success
        )
    }

    pub fn can_restart(self) -> bool {
        matches!(
            self,
            CheckpointStatus::Standby | CheckpointStatus::Stopped | CheckpointStatus::Failed
        )
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            CheckpointStatus::Starting | CheckpointStatus::SourceStarted | CheckpointStatus::Start
        )
    }

    pub fn is_stopping(self) -> bool {
        matches!(
            self,
            CheckpointStatus::Stopping
                | CheckpointStatus::SourceStopped
                | CheckpointStatus::TargetStopped
        )
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckpointStatus::Standby => "standby",
            CheckpointStatus::Preparing => "preparing",
            CheckpointStatus::PrepareStarted => "prepare-started",
            CheckpointStatus::Starting => "starting",
            CheckpointStatus::SourceStarted => "source-started",
            CheckpointStatus::Start => "start",
            CheckpointStatus::Stopping => "stopping",
            CheckpointStatus::SourceStopped => "source-stopped",
            CheckpointStatus::TargetStopped => "target-stopped",
            CheckpointStatus::Stopped => "stopped",
            CheckpointStatus::Success => "success",
            CheckpointStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result returned by `Checkpoint::transfer()` when it does not block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Pending,
    Ok,
    InvalidStatus,
    /// `transfer()` has to wait for the source worker before driving the
    /// target; the caller should treat this like a normal blocking call.
    Started,
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferOutcome::Pending => "pending",
            TransferOutcome::Ok => "ok",
            TransferOutcome::InvalidStatus => "invalid-status",
            TransferOutcome::Started => "started",
        };
        f.write_str(s)
    }
}
