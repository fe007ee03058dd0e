use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bpe_api_types::{CheckpointVersion, DiffAlgorithm, EngineError, StorageItemAttributes, TaskMode};
use bpe_datastore::{packer::decompress_bytes, ChunkSource, FileBlock};
use bpe_tools::wait::Notifier;

use crate::traits::{Target, TargetCheckpoint, TargetTask};

/// Reference streaming Target that materializes each checkpoint as a
/// directory of `chunk-<ordinal>` files, grounded on the `upload_chunk`/DMC
/// sketch in `target.py` simplified to local disk so the engine core is
/// testable without a network dependency.
pub struct LocalFolderTarget {
    accept_modes: Vec<TaskMode>,
    diffs: Vec<DiffAlgorithm>,
}

impl LocalFolderTarget {
    pub fn new() -> Self {
        Self {
            accept_modes: vec![TaskMode::Chunklist, TaskMode::Folder2Chunk],
            diffs: vec![DiffAlgorithm::new("naive")],
        }
    }
}

impl Default for LocalFolderTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl Target for LocalFolderTarget {
    fn accept_modes(&self) -> &[TaskMode] {
        &self.accept_modes
    }

    fn supported_diffs(&self) -> &[DiffAlgorithm] {
        &self.diffs
    }

    fn create_task(&self, target_param: String) -> Box<dyn TargetTask> {
        Box::new(LocalFolderTargetTask {
            root: PathBuf::from(target_param),
        })
    }
}

struct LocalFolderTargetTask {
    root: PathBuf,
}

impl LocalFolderTargetTask {
    fn checkpoint_dir(&self, version: CheckpointVersion) -> PathBuf {
        self.root.join(format!("checkpoint-{}", version.as_u64()))
    }
}

impl TargetTask for LocalFolderTargetTask {
    fn get_last_check_point(&self, source_entity_id: &str) -> Result<Option<CheckpointVersion>, EngineError> {
        let marker = self.root.join(format!("{source_entity_id}.last"));
        match fs::read_to_string(&marker) {
            Ok(contents) => {
                let raw: u64 = contents
                    .trim()
                    .parse()
                    .map_err(|_| EngineError::Corruption(format!("malformed marker {}", marker.display())))?;
                Ok(Some(CheckpointVersion::new(raw)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::TargetUnavailable(e.to_string())),
        }
    }

    fn create_new_check_point(
        &self,
        _entity_id: &str,
        _task_mode: TaskMode,
        version: CheckpointVersion,
    ) -> Result<(), EngineError> {
        fs::create_dir_all(self.checkpoint_dir(version))
            .map_err(|e| EngineError::TargetUnavailable(e.to_string()))
    }

    fn finish_check_point(&self, version: CheckpointVersion) -> Result<(), EngineError> {
        let marker = self.root.join("default.last");
        fs::write(&marker, version.as_u64().to_string())
            .map_err(|e| EngineError::TargetUnavailable(e.to_string()))
    }

    fn target_checkpoint(
        &self,
        version: CheckpointVersion,
    ) -> Result<Box<dyn TargetCheckpoint>, EngineError> {
        let dir = self.checkpoint_dir(version);
        fs::create_dir_all(&dir).map_err(|e| EngineError::TargetUnavailable(e.to_string()))?;
        Ok(Box::new(LocalFolderCheckpoint::new(dir)))
    }
}

/// Where a file's content lives once its owning chunk has landed on disk.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct BlockLocation {
    ordinal: u64,
    block: FileBlock,
    compressed: bool,
}

/// Name of the sidecar manifest mapping path -> `BlockLocation`, the only
/// state besides the raw `chunk-<ordinal>` files that survives a checkpoint
/// being re-opened (restore after this process exits, a second handle used
/// as a delta base, ...).
const INDEX_FILE: &str = "index.json";

fn load_index(dir: &std::path::Path) -> HashMap<String, BlockLocation> {
    match fs::read(dir.join(INDEX_FILE)) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

fn save_index(dir: &std::path::Path, index: &HashMap<String, BlockLocation>) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec(index).map_err(|e| EngineError::Other(e.into()))?;
    fs::write(dir.join(INDEX_FILE), bytes).map_err(|e| EngineError::TargetUnavailable(e.to_string()))
}

struct LocalFolderCheckpoint {
    dir: PathBuf,
    state: Arc<Mutex<State>>,
    notifier: Arc<Notifier>,
    stop_flag: Arc<AtomicBool>,
    /// Path -> block location, populated as chunk bytes land on disk.
    index: Arc<Mutex<HashMap<String, BlockLocation>>>,
}

#[derive(Default)]
struct State {
    finished: bool,
    result: Option<Result<(), EngineError>>,
    worker: Option<JoinHandle<()>>,
}

impl LocalFolderCheckpoint {
    fn new(dir: PathBuf) -> Self {
        let index = load_index(&dir);
        Self {
            dir,
            state: Arc::new(Mutex::new(State::default())),
            notifier: Arc::new(Notifier::new()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            index: Arc::new(Mutex::new(index)),
        }
    }

    fn read_block(&self, location: &BlockLocation) -> Result<Vec<u8>, EngineError> {
        let path = self.dir.join(format!("chunk-{}", location.ordinal));
        let offset = location.block.chunk_offset;
        let length = location.block.length as usize;
        let buf = bpe_tools::retry::RetryPolicy::default()
            .run("target read_block", bpe_tools::retry::is_transient_io, || {
                let mut file = fs::File::open(&path)?;
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = vec![0u8; length];
                file.read_exact(&mut buf)?;
                Ok(buf)
            })
            .map_err(|e| EngineError::TargetUnavailable(e.to_string()))?;
        if location.compressed {
            decompress_bytes(&buf)
        } else {
            Ok(buf)
        }
    }
}

impl TargetCheckpoint for LocalFolderCheckpoint {
    fn transfer(&self, chunks: Arc<dyn ChunkSource>) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.worker.is_some() {
            return Ok(());
        }

        let dir = self.dir.clone();
        let stop_flag = Arc::clone(&self.stop_flag);
        let worker_state = Arc::clone(&self.state);
        let notifier = Arc::clone(&self.notifier);
        let index = Arc::clone(&self.index);

        let handle = std::thread::spawn(move || {
            let outcome = upload_loop(&dir, chunks.as_ref(), &stop_flag, &index);
            let mut state = worker_state.lock().unwrap();
            state.finished = true;
            state.result = Some(outcome);
            drop(state);
            notifier.bump();
        });

        state.worker = Some(handle);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }

    fn wait_finished(&self, timeout: Duration) -> Option<Result<(), EngineError>> {
        let since = self.notifier.current_generation();
        self.notifier
            .wait_for_change(since, timeout, || self.is_finished());
        self.state.lock().unwrap().result.as_ref().map(clone_outcome)
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let worker = self.state.lock().unwrap().worker.take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }

    fn as_storage_reader(&self) -> &dyn bpe_datastore::StorageReader {
        self
    }
}

/// `EngineError` is not `Clone` (its `Other` variant wraps an opaque
/// `anyhow::Error`), but `wait_finished` may be polled by more than one
/// caller, so the terminal outcome is reconstructed by value instead of
/// moved out of `state`.
fn clone_outcome(outcome: &Result<(), EngineError>) -> Result<(), EngineError> {
    match outcome {
        Ok(()) => Ok(()),
        Err(e) => Err(EngineError::TargetUnavailable(e.to_string())),
    }
}

fn upload_loop(
    dir: &std::path::Path,
    chunks: &dyn ChunkSource,
    stop_flag: &AtomicBool,
    index: &Mutex<HashMap<String, BlockLocation>>,
) -> Result<(), EngineError> {
    loop {
        if stop_flag.load(Ordering::SeqCst) {
            return Ok(());
        }

        let chunk = match chunks.next_chunk(&[4 * 1024 * 1024])? {
            Some(chunk) => chunk,
            None => return Ok(()),
        };

        let path = dir.join(format!("chunk-{}", chunk.ordinal));
        let bytes = &chunk.bytes;
        bpe_tools::retry::RetryPolicy::default()
            .run("target write chunk", bpe_tools::retry::is_transient_io, || {
                let mut file = fs::File::create(&path)?;
                file.write_all(bytes)?;
                Ok(())
            })
            .map_err(|e| EngineError::TargetUnavailable(e.to_string()))?;

        let mut guard = index.lock().unwrap();
        for block in chunk.blocks {
            guard.insert(
                block.path.clone(),
                BlockLocation {
                    ordinal: chunk.ordinal,
                    block,
                    compressed: chunk.compressed,
                },
            );
        }
        save_index(dir, &guard)?;
    }
}

impl bpe_datastore::StorageReader for LocalFolderCheckpoint {
    fn read_dir(&self, _path: &str) -> Result<Vec<String>, EngineError> {
        let mut names: Vec<String> = self.index.lock().unwrap().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn file_size(&self, path: &str) -> Result<u64, EngineError> {
        let index = self.index.lock().unwrap();
        let location = index
            .get(path)
            .ok_or_else(|| EngineError::bad_param(format!("no such file {path}")))?;
        Ok(location.block.source_length)
    }

    fn read_file(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>, EngineError> {
        let location = {
            let index = self.index.lock().unwrap();
            index
                .get(path)
                .cloned()
                .ok_or_else(|| EngineError::bad_param(format!("no such file {path}")))?
        };

        if location.block.is_diff {
            return Err(EngineError::bad_param(
                "delta block: apply via the negotiated DiffEngine against the previous checkpoint's content",
            ));
        }

        let bytes = self.read_block(&location)?;
        let start = (offset as usize).min(bytes.len());
        let end = ((offset + length) as usize).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    fn read_link(&self, _path: &str) -> Result<String, EngineError> {
        Err(EngineError::bad_param("not a link"))
    }

    fn stat(&self, path: &str) -> Result<StorageItemAttributes, EngineError> {
        let index = self.index.lock().unwrap();
        let location = index
            .get(path)
            .ok_or_else(|| EngineError::bad_param(format!("no such file {path}")))?;
        Ok(StorageItemAttributes::file(location.block.source_length, 0o644, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpe_datastore::ChunkData;
    use std::sync::Mutex as StdMutex;

    struct VecChunkSource(StdMutex<Vec<ChunkData>>);

    impl ChunkSource for VecChunkSource {
        fn next_chunk(&self, _capacities: &[u64]) -> Result<Option<ChunkData>, EngineError> {
            Ok(self.0.lock().unwrap().pop())
        }
    }

    fn block(path: &str, chunk_offset: u64, length: u64) -> FileBlock {
        FileBlock {
            path: path.to_string(),
            source_offset: 0,
            source_length: length,
            chunk_offset,
            length,
            is_diff: false,
        }
    }

    #[test]
    fn transfer_writes_every_chunk_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let target = LocalFolderTarget::new();
        let task = target.create_task(dir.path().to_string_lossy().into_owned());
        let checkpoint = task.target_checkpoint(CheckpointVersion::FIRST).unwrap();

        let mut chunks = vec![
            ChunkData {
                ordinal: 0,
                bytes: b"abc".to_vec(),
                blocks: vec![block("a.txt", 0, 3)],
                compressed: false,
            },
            ChunkData {
                ordinal: 1,
                bytes: b"defgh".to_vec(),
                blocks: vec![block("b.bin", 0, 5)],
                compressed: false,
            },
        ];
        chunks.reverse();
        let source = Arc::new(VecChunkSource(StdMutex::new(chunks)));

        checkpoint.transfer(source).unwrap();
        let result = checkpoint
            .wait_finished(Duration::from_secs(5))
            .unwrap_or(Ok(()));
        assert!(result.is_ok());

        let checkpoint_dir = dir.path().join("checkpoint-1");
        assert_eq!(fs::read(checkpoint_dir.join("chunk-0")).unwrap(), b"abc");
        assert_eq!(fs::read(checkpoint_dir.join("chunk-1")).unwrap(), b"defgh");
    }

    #[test]
    fn restore_reads_back_uploaded_content() {
        use bpe_datastore::StorageReader;

        let dir = tempfile::tempdir().unwrap();
        let target = LocalFolderTarget::new();
        let task = target.create_task(dir.path().to_string_lossy().into_owned());
        let checkpoint = task.target_checkpoint(CheckpointVersion::FIRST).unwrap();

        let chunks = vec![ChunkData {
            ordinal: 0,
            bytes: b"abchello".to_vec(),
            blocks: vec![block("a.txt", 0, 3), block("b.bin", 3, 5)],
            compressed: false,
        }];
        let source = Arc::new(VecChunkSource(StdMutex::new(chunks)));
        checkpoint.transfer(source).unwrap();
        checkpoint.wait_finished(Duration::from_secs(5));

        assert_eq!(checkpoint.read_file("a.txt", 0, 3).unwrap(), b"abc");
        assert_eq!(checkpoint.read_file("b.bin", 0, 5).unwrap(), b"hello");
    }

    #[test]
    fn last_checkpoint_marker_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let target = LocalFolderTarget::new();
        let task = target.create_task(dir.path().to_string_lossy().into_owned());

        assert_eq!(task.get_last_check_point("entity").unwrap(), None);
        task.finish_check_point(CheckpointVersion::new(3)).unwrap();
        assert_eq!(
            task.get_last_check_point("entity").unwrap(),
            Some(CheckpointVersion::new(3))
        );
    }
}
