use std::sync::Mutex;
use std::time::Duration;

use bpe_api_types::EngineError;
use bpe_tools::wait::Notifier;

use crate::file_record::{DiffDescriptor, FileRecord};

/// Per-Checkpoint catalog of discovered items.
///
/// Append-mostly: `add_file` is the only producer, invoked exclusively by
/// the source worker; `set_scan_finish` is called exactly once when the
/// source worker's walk completes. Readers (the target worker, via the
/// chunk packer) only ever see a prefix of the eventual full list, which is
/// why `list_unpack_files` returns in stable insertion order — resumption
/// after a restart replays the same order.
pub struct FilesDb {
    inner: Mutex<Inner>,
    notifier: Notifier,
}

struct Inner {
    records: Vec<FileRecord>,
    scan_finished: bool,
}

impl Default for FilesDb {
    fn default() -> Self {
        Self::new()
    }
}

impl FilesDb {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: Vec::new(),
                scan_finished: false,
            }),
            notifier: Notifier::new(),
        }
    }

    pub fn add_file(&self, record: FileRecord) {
        let mut inner = self.inner.lock().unwrap();
        if inner.scan_finished {
            log::warn!("add_file({}) called after scan finish, ignoring", record.path);
            return;
        }
        inner.records.push(record);
        drop(inner);
        self.notifier.bump();
    }

    pub fn set_scan_finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.scan_finished {
            log::warn!("set_scan_finish called twice");
            return;
        }
        inner.scan_finished = true;
        drop(inner);
        self.notifier.bump();
    }

    pub fn is_scan_finish(&self) -> bool {
        self.inner.lock().unwrap().scan_finished
    }

    /// Files known so far, not yet assigned to a chunk, in insertion order.
    pub fn list_unpack_files(&self) -> Vec<FileRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| !r.packed)
            .cloned()
            .collect()
    }

    pub fn mark_packed(&self, path: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.path == path)
            .ok_or_else(|| EngineError::Corruption(format!("mark_packed: unknown file {path}")))?;
        record.packed = true;
        Ok(())
    }

    pub fn find_diff(&self, path: &str) -> Option<DiffDescriptor> {
        self.inner
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|r| r.path == path)
            .and_then(|r| r.diff.clone())
    }

    pub fn add_file_diff(&self, path: &str, diff: DiffDescriptor) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.path == path)
            .ok_or_else(|| EngineError::Corruption(format!("add_file_diff: unknown file {path}")))?;
        record.diff = Some(diff);
        Ok(())
    }

    pub fn get_no_hash_files(&self, limit: usize) -> Vec<FileRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| r.is_regular_file() && r.content_hash.is_none())
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn update_file_hash_and_diff(
        &self,
        path: &str,
        hash: [u8; 32],
        diff: Option<DiffDescriptor>,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .records
            .iter_mut()
            .find(|r| r.path == path)
            .ok_or_else(|| {
                EngineError::Corruption(format!("update_file_hash_and_diff: unknown file {path}"))
            })?;
        record.content_hash = Some(hash);
        if diff.is_some() {
            record.diff = diff;
        }
        Ok(())
    }

    /// Directory-mode counterpart of `update_file_hash_and_diff`: folder
    /// mode diffs a directory against its previous version as a whole
    /// (e.g. a tree-hash comparison) rather than per-file.
    pub fn update_dir_diff(&self, path: &str, diff: DiffDescriptor) -> Result<(), EngineError> {
        self.add_file_diff(path, diff)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until `files_db` grows, the scan finishes, or `timeout`
    /// elapses. Returns `true` if there is now unpacked work (or the scan
    /// just finished), `false` on timeout with nothing new.
    pub fn wait_new_file(&self, timeout: Duration) -> bool {
        let since = self.notifier.current_generation();
        self.notifier
            .wait_for_change(since, timeout, || self.is_scan_finish());
        !self.list_unpack_files().is_empty() || self.is_scan_finish()
    }
}
