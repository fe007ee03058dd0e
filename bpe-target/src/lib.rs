//! Target side of the engine: the `Target`/`TargetTask`/`TargetCheckpoint`
//! trait surface (spec §4.3) plus `LocalFolderTarget`, a reference
//! streaming-flavor target backing a local folder, grounded on the
//! `target.py` sketch's `upload_chunk`/DMC pattern.

pub mod local_folder;
pub mod traits;

pub use local_folder::LocalFolderTarget;
pub use traits::{CheckpointMeta, CheckpointMetaItem, Target, TargetCheckpoint, TargetTask};
