/// Error taxonomy for public engine operations (spec §7).
///
/// RPC-layer retries happen inside the Source/Target port implementations
/// and are local to them; what crosses the port boundary and reaches the
/// Checkpoint/Task/Engine is always one of these kinds.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("unknown source or target id {0}")]
    UnknownEndpoint(u64),

    #[error("bad parameter: {0}")]
    BadParam(String),

    #[error("source and target share no common task mode")]
    IncompatibleModes,

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("operation denied: {0}")]
    Denied(String),

    #[error("lock conflict on locked-state {0}")]
    LockConflict(u64),

    #[error("invalid status for this operation: {0}")]
    InvalidStatus(String),

    #[error("prior checkpoint is not finished yet")]
    PriorCheckpointUnfinished,

    #[error("read is ahead of the packer, not ready yet")]
    NotReady,

    #[error("catalog invariant violated: {0}")]
    Corruption(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn bad_param(msg: impl Into<String>) -> Self {
        EngineError::BadParam(msg.into())
    }

    pub fn invalid_status(msg: impl Into<String>) -> Self {
        EngineError::InvalidStatus(msg.into())
    }

    /// Whether the worker should retry this error locally before giving up
    /// and surfacing it to the Checkpoint as FAILED (spec §7: transient
    /// remote failures are retried, everything else is not).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::SourceUnavailable(_) | EngineError::TargetUnavailable(_)
        )
    }
}
