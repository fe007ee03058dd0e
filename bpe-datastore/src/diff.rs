use bpe_api_types::EngineError;

use crate::file_record::DiffDescriptor;

/// Pluggable delta algorithm. The engine orchestrates diffing but never
/// implements a specific algorithm itself (spec §1 non-goals); a real
/// deployment plugs in something like an rsync-style rolling-hash diff or
/// a binary-diff algorithm such as vcdiff/xdelta.
pub trait DiffEngine: Send + Sync {
    fn name(&self) -> &str;

    fn diff(&self, old: &[u8], new: &[u8]) -> Result<DiffDescriptor, EngineError>;

    fn apply(&self, old: &[u8], diff: &DiffDescriptor) -> Result<Vec<u8>, EngineError>;
}

/// Reference `DiffEngine` used by the local-directory Source/Target pair
/// and by the test suite: stores the new content verbatim when it differs
/// from the old content, and an empty marker when it doesn't. This is
/// intentionally not a compact binary diff — it exists to exercise the
/// diff/delta plumbing end to end without pulling in a third-party diff
/// crate the teacher workspace doesn't already carry.
#[derive(Debug, Default)]
pub struct NaiveDiff;

const UNCHANGED_MARKER: u8 = 0;
const REPLACED_MARKER: u8 = 1;

impl DiffEngine for NaiveDiff {
    fn name(&self) -> &str {
        "naive"
    }

    fn diff(&self, old: &[u8], new: &[u8]) -> Result<DiffDescriptor, EngineError> {
        if old == new {
            return Ok(DiffDescriptor(vec![UNCHANGED_MARKER]));
        }
        let mut out = Vec::with_capacity(new.len() + 1);
        out.push(REPLACED_MARKER);
        out.extend_from_slice(new);
        Ok(DiffDescriptor(out))
    }

    fn apply(&self, old: &[u8], diff: &DiffDescriptor) -> Result<Vec<u8>, EngineError> {
        match diff.0.split_first() {
            Some((&UNCHANGED_MARKER, _)) => Ok(old.to_vec()),
            Some((&REPLACED_MARKER, rest)) => Ok(rest.to_vec()),
            _ => Err(EngineError::Corruption("malformed diff descriptor".into())),
        }
    }
}
