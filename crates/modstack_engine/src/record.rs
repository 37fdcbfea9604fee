//! Per-path change records and history entries.

use crate::error::{Error, Result};
use crate::path::ModFilePath;
use crate::resource::SharedResource;
use modstack_project::FilePatch;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What must happen to a path.
#[derive(Clone)]
pub enum RecordOp {
    /// Write the resource's bytes to the path.
    Add(SharedResource),
    /// Delete the path.
    Remove,
    /// Leave the path alone except for the record's patches.
    PatchOnly,
}

impl fmt::Debug for RecordOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordOp::Add(resource) => write!(f, "Add({})", resource.path()),
            RecordOp::Remove => f.write_str("Remove"),
            RecordOp::PatchOnly => f.write_str("PatchOnly"),
        }
    }
}

/// Where a record came from.
///
/// History-sourced records undo the previous apply and never write history
/// themselves; mod-sourced records are new changes and always do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    FromHistory,
    FromMod,
}

/// How a path differed from the baseline after the last committed apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BaselineKind {
    /// The path did not exist in the baseline.
    Added,
    /// The path existed and its content was replaced.
    Replaced,
    /// The path existed and was deleted.
    Removed,
}

/// A committed baseline fact about one path.
///
/// Replaced and Removed entries carry the resource holding the original bytes;
/// an Added entry never does, since nothing original existed.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    kind: BaselineKind,
    original: Option<SharedResource>,
}

impl HistoryEntry {
    pub fn added() -> Self {
        Self {
            kind: BaselineKind::Added,
            original: None,
        }
    }

    pub fn replaced(original: SharedResource) -> Self {
        Self {
            kind: BaselineKind::Replaced,
            original: Some(original),
        }
    }

    pub fn removed(original: SharedResource) -> Self {
        Self {
            kind: BaselineKind::Removed,
            original: Some(original),
        }
    }

    pub fn kind(&self) -> BaselineKind {
        self.kind
    }

    pub fn original(&self) -> Option<&SharedResource> {
        self.original.as_ref()
    }
}

/// The pending transition of one path during one apply.
#[derive(Debug, Clone)]
pub struct FileChangeRecord {
    op: RecordOp,
    source: RecordSource,
    path: ModFilePath,
    prior_baseline: Option<HistoryEntry>,
    patches: Vec<FilePatch>,
}

impl FileChangeRecord {
    pub fn add(path: ModFilePath, resource: SharedResource, source: RecordSource) -> Self {
        Self {
            op: RecordOp::Add(resource),
            source,
            path,
            prior_baseline: None,
            patches: Vec::new(),
        }
    }

    pub fn remove(path: ModFilePath, source: RecordSource) -> Self {
        Self {
            op: RecordOp::Remove,
            source,
            path,
            prior_baseline: None,
            patches: Vec::new(),
        }
    }

    /// A record that only patches the path. Fails if `patches` is empty.
    pub fn patch_only(path: ModFilePath, patches: Vec<FilePatch>) -> Result<Self> {
        if patches.is_empty() {
            return Err(Error::ContractViolation(format!(
                "patch-only record for '{}' has no patches",
                path
            )));
        }
        Ok(Self {
            op: RecordOp::PatchOnly,
            source: RecordSource::FromMod,
            path,
            prior_baseline: None,
            patches,
        })
    }

    /// Neutral occupant for a path that only receives patches.
    pub(crate) fn placeholder(path: ModFilePath) -> Self {
        Self {
            op: RecordOp::PatchOnly,
            source: RecordSource::FromMod,
            path,
            prior_baseline: None,
            patches: Vec::new(),
        }
    }

    pub fn with_prior_baseline(mut self, prior: HistoryEntry) -> Self {
        self.prior_baseline = Some(prior);
        self
    }

    pub fn op(&self) -> &RecordOp {
        &self.op
    }

    pub fn source(&self) -> RecordSource {
        self.source
    }

    pub fn path(&self) -> &ModFilePath {
        &self.path
    }

    pub fn prior_baseline(&self) -> Option<&HistoryEntry> {
        self.prior_baseline.as_ref()
    }

    pub fn patches(&self) -> &[FilePatch] {
        &self.patches
    }

    pub fn is_patch_only(&self) -> bool {
        matches!(self.op, RecordOp::PatchOnly)
    }

    pub fn is_remove(&self) -> bool {
        matches!(self.op, RecordOp::Remove)
    }

    /// Whether applying this record produces entries in the new history.
    pub fn writes_history(&self) -> bool {
        self.source == RecordSource::FromMod
    }

    pub(crate) fn take_patches(&mut self) -> Vec<FilePatch> {
        std::mem::take(&mut self.patches)
    }

    /// Layer patches on top of this record.
    ///
    /// A Remove record never carries patches, so they are dropped. Patching a
    /// history-sourced record turns it into a new change that must be recorded.
    pub(crate) fn attach_patches(&mut self, patches: Vec<FilePatch>) {
        if self.is_remove() {
            tracing::debug!(
                "Dropping {} patch(es) for '{}': path is being removed",
                patches.len(),
                self.path
            );
            return;
        }
        if self.source == RecordSource::FromHistory {
            self.source = RecordSource::FromMod;
        }
        self.patches.extend(patches);
    }

    pub(crate) fn inherit_prior_baseline(&mut self, prior: Option<HistoryEntry>) {
        if self.prior_baseline.is_none() {
            self.prior_baseline = prior;
        }
    }
}
