use std::fmt;

/// Negotiated representation of content in transit between a Source and a
/// Target, replacing the dynamic `"chunklist"` / `"folder"` / ... strings
/// of the original design with a closed, exhaustively-matched variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TaskMode {
    /// Source produces a flat list of content-addressed chunks; Target
    /// consumes a chunk stream.
    Chunklist,
    /// Source exposes a directory tree; Target wants a directory tree.
    Folder,
    /// Source exposes a directory tree; Target wants chunks (the engine
    /// packs the tree into chunks itself).
    Folder2Chunk,
    /// Source produces chunks; Target wants a directory tree (the engine
    /// unpacks chunks into files itself).
    Chunk2Folder,
}

impl TaskMode {
    /// Preference order used to tie-break when a Source/Target pair
    /// supports more than one common mode.
    const PREFERENCE: [TaskMode; 4] = [
        TaskMode::Chunklist,
        TaskMode::Folder2Chunk,
        TaskMode::Chunk2Folder,
        TaskMode::Folder,
    ];

    /// Picks the most-preferred mode that both an output-mode set and an
    /// accept-mode set agree on.
    pub fn negotiate(output_modes: &[TaskMode], accept_modes: &[TaskMode]) -> Option<TaskMode> {
        Self::PREFERENCE
            .iter()
            .copied()
            .find(|mode| output_modes.contains(mode) && accept_modes.contains(mode))
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskMode::Chunklist => "chunklist",
            TaskMode::Folder => "folder",
            TaskMode::Folder2Chunk => "folder2chunk",
            TaskMode::Chunk2Folder => "chunk2folder",
        };
        f.write_str(s)
    }
}

/// Name of a diff/delta algorithm a Source or Target declares support for.
///
/// The engine never implements a concrete diff algorithm itself (see the
/// non-goals); it only negotiates a common name and invokes it through the
/// `bpe_datastore::diff::DiffEngine` callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DiffAlgorithm(String);

impl DiffAlgorithm {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// First algorithm present in both lists, in `ours`' order, or `None`
    /// (meaning: full backup, no delta).
    pub fn negotiate(ours: &[DiffAlgorithm], theirs: &[DiffAlgorithm]) -> Option<DiffAlgorithm> {
        ours.iter().find(|a| theirs.contains(a)).cloned()
    }
}

impl fmt::Display for DiffAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
