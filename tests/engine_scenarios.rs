//! End-to-end scenarios run against the real `LocalDirSource` /
//! `LocalFolderTarget` reference implementations, corresponding to the
//! testable properties enumerated alongside the state machine: a full
//! backup restores byte-identical, a delta backup only re-transmits
//! changed content, a stopped checkpoint resumes to the same result, an
//! incompatible mode pairing is rejected up front, a second unfinished
//! checkpoint is rejected, and re-locking a source supersedes the prior
//! lock.

use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use backup_engine::Engine;
use bpe_api_types::{CheckpointStatus, EngineError, TaskMode, TransferOutcome};
use bpe_datastore::{DiffEngine, NaiveDiff, StorageReader};
use bpe_source::{LocalDirSource, Source};
use bpe_target::{LocalFolderTarget, Target};

fn write_file(dir: &std::path::Path, name: &str, content: &[u8]) {
    let mut f = fs::File::create(dir.join(name)).unwrap();
    f.write_all(content).unwrap();
}

/// S1: a full backup of a small tree restores byte-identical content, one
/// chunk per file (`free_limit` forced to 0 so packing closes a chunk as
/// soon as it has anything in it).
#[test]
fn full_backup_restores_byte_identical_content() {
    let source_dir = tempfile::tempdir().unwrap();
    write_file(source_dir.path(), "a.txt", b"hello world");
    write_file(source_dir.path(), "b.bin", b"binary-ish content");

    let target_dir = tempfile::tempdir().unwrap();

    let engine = Engine::new();
    let source_id = engine.register_source(Arc::new(LocalDirSource::new()));
    let target_id = engine.register_target(Arc::new(LocalFolderTarget::new()));

    let (task_id, task) = engine
        .create_task(
            source_id,
            source_dir.path().to_string_lossy().into_owned(),
            target_id,
            target_dir.path().to_string_lossy().into_owned(),
        )
        .unwrap();

    task.lock_source().unwrap();
    let checkpoint = task.create_checkpoint(false, None, false, 0).unwrap();
    assert_eq!(checkpoint.status(), CheckpointStatus::PrepareStarted);

    let target_checkpoint = task.target_task().target_checkpoint(checkpoint.version()).unwrap();
    let outcome = checkpoint.transfer(Arc::from(target_checkpoint));
    assert_eq!(outcome, TransferOutcome::Ok);
    assert_eq!(checkpoint.status(), CheckpointStatus::Success, "{:?}", checkpoint.last_error());

    let status = engine.get_backup_task_status(task_id).unwrap();
    assert_eq!(status.last_checkpoint.unwrap().status, CheckpointStatus::Success);

    let restore_checkpoint = task.target_task().target_checkpoint(checkpoint.version()).unwrap();
    assert_eq!(restore_checkpoint.read_file("a.txt", 0, 11).unwrap(), b"hello world");
    assert_eq!(
        restore_checkpoint.read_file("b.bin", 0, 19).unwrap(),
        b"binary-ish content"
    );
}

/// S2: a delta checkpoint against a SUCCESS predecessor only stores a diff
/// block for the file that actually changed.
#[test]
fn delta_backup_only_diffs_changed_files() {
    let source_dir = tempfile::tempdir().unwrap();
    write_file(source_dir.path(), "a.txt", b"version one");
    write_file(source_dir.path(), "b.bin", b"never changes");

    let target_dir = tempfile::tempdir().unwrap();

    let engine = Engine::new();
    let source_id = engine.register_source(Arc::new(LocalDirSource::new()));
    let target_id = engine.register_target(Arc::new(LocalFolderTarget::new()));
    let (_task_id, task) = engine
        .create_task(
            source_id,
            source_dir.path().to_string_lossy().into_owned(),
            target_id,
            target_dir.path().to_string_lossy().into_owned(),
        )
        .unwrap();

    task.lock_source().unwrap();
    let first = task.create_checkpoint(false, None, false, 0).unwrap();
    let first_target = task.target_task().target_checkpoint(first.version()).unwrap();
    assert_eq!(first.transfer(Arc::from(first_target)), TransferOutcome::Ok);
    assert_eq!(first.status(), CheckpointStatus::Success);

    write_file(source_dir.path(), "a.txt", b"version two, longer");
    task.lock_source().unwrap();

    let diff_engine: Arc<dyn DiffEngine> = Arc::new(NaiveDiff);
    let second = task.create_checkpoint(true, Some(diff_engine), false, 0).unwrap();
    assert_eq!(second.prev_version(), Some(first.version()));

    let second_target = task.target_task().target_checkpoint(second.version()).unwrap();
    assert_eq!(second.transfer(Arc::from(second_target)), TransferOutcome::Ok);
    assert_eq!(second.status(), CheckpointStatus::Success, "{:?}", second.last_error());

    let blocks: Vec<_> = second
        .chunks_db()
        .list()
        .into_iter()
        .flat_map(|c| c.blocks)
        .collect();
    let a_block = blocks.iter().find(|b| b.path == "a.txt").unwrap();
    let b_block = blocks.iter().find(|b| b.path == "b.bin").unwrap();
    assert!(a_block.is_diff, "changed file should be packed as a diff");
    assert!(b_block.is_diff, "unchanged file still goes through the diff path, but as a no-op marker");

    let stored_diff = second.files_db().find_diff("a.txt").unwrap();
    assert_eq!(
        NaiveDiff.apply(b"version one", &stored_diff).unwrap(),
        b"version two, longer"
    );
}

/// S3: stopping a checkpoint after its source scan has completed, then
/// resuming it through the engine, reaches the same SUCCESS result with
/// the same content — the resumed run does not re-scan or duplicate work.
#[test]
fn stopped_checkpoint_resumes_to_the_same_result() {
    let source_dir = tempfile::tempdir().unwrap();
    write_file(source_dir.path(), "a.txt", b"resumable content");

    let target_dir = tempfile::tempdir().unwrap();

    let engine = Engine::new();
    let source_id = engine.register_source(Arc::new(LocalDirSource::new()));
    let target_id = engine.register_target(Arc::new(LocalFolderTarget::new()));
    let (task_id, task) = engine
        .create_task(
            source_id,
            source_dir.path().to_string_lossy().into_owned(),
            target_id,
            target_dir.path().to_string_lossy().into_owned(),
        )
        .unwrap();

    task.lock_source().unwrap();
    let checkpoint = task.create_checkpoint(false, None, false, 0).unwrap();

    for _ in 0..200 {
        if checkpoint.files_db().is_scan_finish() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(checkpoint.files_db().is_scan_finish());

    checkpoint.stop();
    assert_eq!(checkpoint.status(), CheckpointStatus::Stopped);
    assert!(checkpoint.status().can_restart());

    let resumed = engine.resume_backup_task(task_id).unwrap();
    assert_eq!(resumed, TransferOutcome::Ok);
    assert_eq!(checkpoint.status(), CheckpointStatus::Success, "{:?}", checkpoint.last_error());

    let restore_checkpoint = task.target_task().target_checkpoint(checkpoint.version()).unwrap();
    assert_eq!(restore_checkpoint.read_file("a.txt", 0, 18).unwrap(), b"resumable content");
    assert_eq!(checkpoint.files_db().list_unpack_files().len(), 0);
}

/// S4: a Source/Target pair that shares no task mode is rejected at
/// `create_task`, before any lock or checkpoint is attempted.
#[test]
fn incompatible_modes_are_rejected_at_task_creation() {
    struct OnlyFolder;
    impl Source for OnlyFolder {
        fn output_modes(&self) -> &[TaskMode] {
            &[TaskMode::Folder]
        }
        fn supported_diffs(&self) -> &[bpe_api_types::DiffAlgorithm] {
            &[]
        }
        fn create_task(&self, _source_param: String) -> Box<dyn bpe_source::SourceTask> {
            unreachable!("create_task must fail before a SourceTask is needed")
        }
    }
    struct OnlyChunk2Folder;
    impl Target for OnlyChunk2Folder {
        fn accept_modes(&self) -> &[TaskMode] {
            &[TaskMode::Chunk2Folder]
        }
        fn supported_diffs(&self) -> &[bpe_api_types::DiffAlgorithm] {
            &[]
        }
        fn create_task(&self, _target_param: String) -> Box<dyn bpe_target::TargetTask> {
            unreachable!("create_task must fail before a TargetTask is needed")
        }
    }

    let engine = Engine::new();
    let source_id = engine.register_source(Arc::new(OnlyFolder));
    let target_id = engine.register_target(Arc::new(OnlyChunk2Folder));

    let err = engine
        .create_task(source_id, "irrelevant".into(), target_id, "irrelevant".into())
        .unwrap_err();
    assert!(matches!(err, EngineError::IncompatibleModes));
}

/// S5: a second checkpoint cannot be created while the task's last
/// checkpoint has not reached a finished status.
#[test]
fn second_checkpoint_is_rejected_while_first_is_unfinished() {
    let source_dir = tempfile::tempdir().unwrap();
    write_file(source_dir.path(), "a.txt", b"abc");
    let target_dir = tempfile::tempdir().unwrap();

    let engine = Engine::new();
    let source_id = engine.register_source(Arc::new(LocalDirSource::new()));
    let target_id = engine.register_target(Arc::new(LocalFolderTarget::new()));
    let (_task_id, task) = engine
        .create_task(
            source_id,
            source_dir.path().to_string_lossy().into_owned(),
            target_id,
            target_dir.path().to_string_lossy().into_owned(),
        )
        .unwrap();

    task.lock_source().unwrap();
    let first = task.create_checkpoint(false, None, false, 0).unwrap();
    assert!(!first.status().is_finished());

    let err = task.create_checkpoint(false, None, false, 0).unwrap_err();
    assert!(matches!(err, EngineError::PriorCheckpointUnfinished));
}

/// S6: locking an already-locked source implicitly tears down the prior
/// lock (its staging copy is removed) and replaces it with a fresh one.
#[test]
fn relocking_a_source_supersedes_the_prior_lock() {
    let source_dir = tempfile::tempdir().unwrap();
    write_file(source_dir.path(), "a.txt", b"abc");
    let target_dir = tempfile::tempdir().unwrap();

    let engine = Engine::new();
    let source_id = engine.register_source(Arc::new(LocalDirSource::new()));
    let target_id = engine.register_target(Arc::new(LocalFolderTarget::new()));
    let (_task_id, task) = engine
        .create_task(
            source_id,
            source_dir.path().to_string_lossy().into_owned(),
            target_id,
            target_dir.path().to_string_lossy().into_owned(),
        )
        .unwrap();

    let first_lock = task.lock_source().unwrap();
    let second_lock = task.lock_source().unwrap();
    assert_ne!(first_lock, second_lock);
    assert!(task.is_source_locked());

    task.unlock_source().unwrap();
    assert!(!task.is_source_locked());
}
