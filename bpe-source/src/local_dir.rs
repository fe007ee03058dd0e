use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bpe_api_types::{DiffAlgorithm, EngineError, LockedStateId, StorageItemAttributes, TaskMode};
use bpe_datastore::{FileRecord, FilesDb, StorageReader};

use crate::traits::{Source, SourceLocked, SourceTask};

/// Reference Source backing a local directory tree, grounded on the
/// `source.py` sketch: `original_state` mints a `snapshot:<n>` token,
/// `lock_state` stages a read-only copy of the tree so concurrent writes
/// to the real directory cannot be observed through the locked view, and
/// `restore_state` removes the staging copy.
pub struct LocalDirSource {
    output_modes: Vec<TaskMode>,
    diffs: Vec<DiffAlgorithm>,
}

impl LocalDirSource {
    pub fn new() -> Self {
        Self {
            output_modes: vec![TaskMode::Folder, TaskMode::Folder2Chunk],
            diffs: vec![DiffAlgorithm::new("naive")],
        }
    }
}

impl Default for LocalDirSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Source for LocalDirSource {
    fn output_modes(&self) -> &[TaskMode] {
        &self.output_modes
    }

    fn supported_diffs(&self) -> &[DiffAlgorithm] {
        &self.diffs
    }

    fn create_task(&self, source_param: String) -> Box<dyn SourceTask> {
        Box::new(LocalDirSourceTask {
            root: PathBuf::from(source_param),
            next_snapshot: AtomicU64::new(1),
            staged: Mutex::new(HashMap::new()),
        })
    }
}

struct LocalDirSourceTask {
    root: PathBuf,
    next_snapshot: AtomicU64,
    /// original_state token -> staging directory, so `restore_state` can
    /// find (and remove) the copy `lock_state` created for it.
    staged: Mutex<HashMap<String, PathBuf>>,
}

impl SourceTask for LocalDirSourceTask {
    fn original_state(&self) -> Result<String, EngineError> {
        if !self.root.is_dir() {
            return Err(EngineError::BadParam(format!(
                "source path {} is not a directory",
                self.root.display()
            )));
        }
        let n = self.next_snapshot.fetch_add(1, Ordering::SeqCst);
        Ok(format!("snapshot:{n}"))
    }

    fn lock_state(&self, original_state: &str) -> Result<String, EngineError> {
        let staging = tempfile::Builder::new()
            .prefix("bpe-source-lock-")
            .tempdir()
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?
            .into_path();

        copy_tree(&self.root, &staging).map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;

        self.staged
            .lock()
            .unwrap()
            .insert(original_state.to_string(), staging.clone());

        Ok(staging.to_string_lossy().into_owned())
    }

    fn restore_state(&self, original_state: &str) -> Result<(), EngineError> {
        if let Some(staging) = self.staged.lock().unwrap().remove(original_state) {
            let _ = fs::remove_dir_all(&staging);
        }
        Ok(())
    }

    fn source_locked(
        &self,
        locked_state_id: LockedStateId,
        locked_token: &str,
    ) -> Box<dyn SourceLocked> {
        Box::new(LocalDirSourceLocked {
            locked_state_id,
            root: PathBuf::from(locked_token),
            files_db: Mutex::new(None),
            scan_handle: Mutex::new(None),
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry.path().strip_prefix(src).unwrap();
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

struct LocalDirSourceLocked {
    #[allow(dead_code)]
    locked_state_id: LockedStateId,
    root: PathBuf,
    files_db: Mutex<Option<Arc<FilesDb>>>,
    scan_handle: Mutex<Option<JoinHandle<()>>>,
    stop_flag: Arc<AtomicBool>,
}

impl LocalDirSourceLocked {
    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn relative_path(&self, abs: &Path) -> String {
        abs.strip_prefix(&self.root)
            .unwrap_or(abs)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

impl StorageReader for LocalDirSourceLocked {
    fn read_dir(&self, path: &str) -> Result<Vec<String>, EngineError> {
        let full = self.full_path(path);
        let mut out = Vec::new();
        let entries =
            fs::read_dir(&full).map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
        out.sort();
        Ok(out)
    }

    fn file_size(&self, path: &str) -> Result<u64, EngineError> {
        let meta = fs::symlink_metadata(self.full_path(path))
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;
        Ok(meta.len())
    }

    fn read_file(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>, EngineError> {
        let full = self.full_path(path);
        bpe_tools::retry::RetryPolicy::default()
            .run("source read_file", bpe_tools::retry::is_transient_io, || {
                let mut file = fs::File::open(&full)?;
                file.seek(SeekFrom::Start(offset))?;
                let size = file.metadata()?.len();
                let remaining = size.saturating_sub(offset);
                let to_read = length.min(remaining) as usize;
                let mut buf = vec![0u8; to_read];
                file.read_exact(&mut buf)?;
                Ok(buf)
            })
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))
    }

    fn read_link(&self, path: &str) -> Result<String, EngineError> {
        let target = fs::read_link(self.full_path(path))
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;
        Ok(target.to_string_lossy().into_owned())
    }

    fn stat(&self, path: &str) -> Result<StorageItemAttributes, EngineError> {
        let full = self.full_path(path);
        let meta = fs::symlink_metadata(&full)
            .map_err(|e| EngineError::SourceUnavailable(e.to_string()))?;
        Ok(attributes_from_metadata(&full, &meta))
    }
}

fn attributes_from_metadata(path: &Path, meta: &fs::Metadata) -> StorageItemAttributes {
    use std::os::unix::fs::MetadataExt;

    let mtime = meta.mtime();
    let mode = meta.mode();

    if meta.is_dir() {
        StorageItemAttributes::directory(mode, mtime)
    } else if meta.file_type().is_symlink() {
        let target = fs::read_link(path)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        StorageItemAttributes::symlink(target, mtime)
    } else {
        StorageItemAttributes::file(meta.len(), mode, mtime)
    }
}

impl SourceLocked for LocalDirSourceLocked {
    fn prepare(&self, files_db: Arc<FilesDb>) -> Result<(), EngineError> {
        *self.files_db.lock().unwrap() = Some(Arc::clone(&files_db));

        let root = self.root.clone();
        let stop_flag = Arc::clone(&self.stop_flag);

        let handle = std::thread::spawn(move || {
            scan_file_list(&root, &files_db, &stop_flag);
        });

        *self.scan_handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn is_files_scan_finish(&self) -> bool {
        match self.files_db.lock().unwrap().as_ref() {
            Some(db) => db.is_scan_finish(),
            None => false,
        }
    }

    fn wait_new_file(&self, timeout: Duration) -> bool {
        match self.files_db.lock().unwrap().as_ref() {
            Some(db) => db.wait_new_file(timeout),
            None => false,
        }
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.scan_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn as_storage_reader(&self) -> &dyn StorageReader {
        self
    }
}

/// Walks `root` and records every directory, file and symlink in
/// `files_db`, mirroring `source.py`'s `source_scan_file_list`. Stops
/// early (without calling `set_scan_finish`) if `stop_flag` is raised,
/// per the cooperative-cancellation requirement of spec §5.
fn scan_file_list(root: &Path, files_db: &FilesDb, stop_flag: &AtomicBool) {
    for entry in walkdir::WalkDir::new(root).min_depth(1).sort_by_file_name() {
        if stop_flag.load(Ordering::SeqCst) {
            return;
        }

        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                log::warn!("scan: skipping entry: {err}");
                continue;
            }
        };

        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(err) => {
                log::warn!("scan: stat failed for {rel}: {err}");
                continue;
            }
        };

        let attributes = attributes_from_metadata(entry.path(), &meta);
        files_db.add_file(FileRecord::new(rel, attributes));
    }

    if !stop_flag.load(Ordering::SeqCst) {
        files_db.set_scan_finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn write_file(path: &Path, content: &[u8]) {
        let mut f = File::create(path).unwrap();
        f.write_all(content).unwrap();
    }

    #[test]
    fn lock_then_unlock_stages_and_cleans_up_a_copy() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.txt"), b"abc");

        let source = LocalDirSource::new();
        let task = source.create_task(dir.path().to_string_lossy().into_owned());

        let original = task.original_state().unwrap();
        assert_eq!(original, "snapshot:1");

        let locked_token = task.lock_state(&original).unwrap();
        let staged_path = PathBuf::from(&locked_token);
        assert!(staged_path.join("a.txt").exists());

        task.restore_state(&original).unwrap();
        assert!(!staged_path.exists());
    }

    #[test]
    fn scan_populates_files_db_and_finishes() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a.txt"), b"abc");
        write_file(&dir.path().join("b.bin"), b"hello");

        let source = LocalDirSource::new();
        let task = source.create_task(dir.path().to_string_lossy().into_owned());
        let original = task.original_state().unwrap();
        let locked_token = task.lock_state(&original).unwrap();
        let locked = task.source_locked(LockedStateId::new(1), &locked_token);

        let files_db = Arc::new(FilesDb::new());
        locked.prepare(Arc::clone(&files_db)).unwrap();

        for _ in 0..200 {
            if locked.is_files_scan_finish() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        assert!(locked.is_files_scan_finish());
        let mut paths: Vec<_> = files_db
            .list_unpack_files()
            .into_iter()
            .map(|f| f.path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["a.txt".to_string(), "b.bin".to_string()]);

        task.restore_state(&original).unwrap();
    }
}
