use bpe_api_types::{StorageItemAttributes, StorageItemKind};

/// Opaque per-file delta descriptor produced by a `DiffEngine`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDescriptor(pub Vec<u8>);

impl DiffDescriptor {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One row of `files_db`: an item discovered by the source scan, with its
/// hash and delta-descriptor filled in possibly later, and a flag tracking
/// whether it has already been assigned to a chunk.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub attributes: StorageItemAttributes,
    pub content_hash: Option<[u8; 32]>,
    pub diff: Option<DiffDescriptor>,
    pub packed: bool,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, attributes: StorageItemAttributes) -> Self {
        Self {
            path: path.into(),
            attributes,
            content_hash: None,
            diff: None,
            packed: false,
        }
    }

    pub fn kind(&self) -> StorageItemKind {
        self.attributes.kind
    }

    pub fn is_regular_file(&self) -> bool {
        self.attributes.kind == StorageItemKind::File
    }
}
