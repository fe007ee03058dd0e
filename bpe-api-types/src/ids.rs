use std::fmt;

macro_rules! small_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

small_id!(SourceId, "Stable id assigned to a registered Source by the Engine.");
small_id!(TargetId, "Stable id assigned to a registered Target by the Engine.");
small_id!(TaskId, "Stable id assigned to a Task by the Engine.");
small_id!(LockedStateId, "Identifies one `lock_source`/`unlock_source` cycle of a Task.");

/// Monotonically increasing per-Task checkpoint version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct CheckpointVersion(u64);

impl CheckpointVersion {
    pub const FIRST: CheckpointVersion = CheckpointVersion(1);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CheckpointVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Allocates fresh small integer ids starting at 1, mirroring the
/// `next_source_id`/`next_target_id`/`next_checkpoint_version` counters of
/// the pseudo-code engine.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn alloc(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}
