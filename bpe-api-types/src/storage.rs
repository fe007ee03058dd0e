/// Kind of item a `StorageReader` can enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StorageItemKind {
    Directory,
    File,
    Symlink,
}

/// Attributes of an item read through a `StorageReader`.
///
/// The engine never promises to preserve more than this: restore fidelity
/// beyond size/mode/mtime/link-target is a property of the concrete
/// Source/Target pair, not of the engine core (see non-goals).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StorageItemAttributes {
    pub kind: StorageItemKind,
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
    pub link_target: Option<String>,
}

impl StorageItemAttributes {
    pub fn file(size: u64, mode: u32, mtime: i64) -> Self {
        Self {
            kind: StorageItemKind::File,
            size,
            mode,
            mtime,
            link_target: None,
        }
    }

    pub fn directory(mode: u32, mtime: i64) -> Self {
        Self {
            kind: StorageItemKind::Directory,
            size: 0,
            mode,
            mtime,
            link_target: None,
        }
    }

    pub fn symlink(target: impl Into<String>, mtime: i64) -> Self {
        Self {
            kind: StorageItemKind::Symlink,
            size: 0,
            mode: 0o777,
            mtime,
            link_target: Some(target.into()),
        }
    }
}
