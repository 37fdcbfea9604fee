//! File history persistence and the builder that produces it.
//!
//! After every apply, a [`LibraryFileHistory`] is written as `history.json` next to
//! a backup store holding the original bytes of every replaced or removed path.
//! On the next apply the engine turns each entry back into a revert record, so the
//! history always describes exactly how to get from the current modded state back
//! to the baseline.
//!
//! The history is never appended to. [`HistoryBuilder`] assembles a complete new
//! one while the apply runs, writing backups into a fresh staging area, and
//! [`HistoryBuilder::commit`] swaps it in at the end.

use crate::error::{Error, Result};
use crate::library::ModLibrary;
use crate::path::{ModFilePath, PathKey};
use crate::record::{BaselineKind, FileChangeRecord, HistoryEntry, RecordOp};
use crate::resource::SharedResource;
use crate::utils::backup_file_name;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current schema version of `history.json`.
pub const HISTORY_VERSION: u32 = 1;

/// Persisted description of how to turn the modded installation back into its baseline.
///
/// # JSON format
///
/// ```json
/// {
///   "version": 1,
///   "addedFiles": [{ "filePath": "data/new.txt" }],
///   "replacedFiles": [{ "filePath": "icons/a.png", "location": "data/ui.zip", "locationId": "zip" }],
///   "removedFiles": []
/// }
/// ```
///
/// Replaced and removed paths are paired with backup files in the library's
/// backup store, named by [`backup_file_name`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryFileHistory {
    pub version: u32,
    #[serde(default)]
    pub added_files: Vec<ModFilePath>,
    #[serde(default)]
    pub replaced_files: Vec<ModFilePath>,
    #[serde(default)]
    pub removed_files: Vec<ModFilePath>,
}

impl Default for LibraryFileHistory {
    fn default() -> Self {
        Self {
            version: HISTORY_VERSION,
            added_files: Vec::new(),
            replaced_files: Vec::new(),
            removed_files: Vec::new(),
        }
    }
}

impl LibraryFileHistory {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.added_files.len() + self.replaced_files.len() + self.removed_files.len()
    }

    /// Iterate every path with the kind of change it records.
    pub fn entries(&self) -> impl Iterator<Item = (&ModFilePath, BaselineKind)> {
        let added = self.added_files.iter().map(|p| (p, BaselineKind::Added));
        let replaced = self.replaced_files.iter().map(|p| (p, BaselineKind::Replaced));
        let removed = self.removed_files.iter().map(|p| (p, BaselineKind::Removed));
        added.chain(replaced).chain(removed)
    }

    /// Resolve every path into a [`HistoryEntry`], looking up original bytes in the library.
    pub fn load_entries(
        &self,
        library: &dyn ModLibrary,
    ) -> Result<Vec<(ModFilePath, HistoryEntry)>> {
        self.entries()
            .map(|(path, kind)| {
                let entry = match kind {
                    BaselineKind::Added => HistoryEntry::added(),
                    BaselineKind::Replaced => {
                        HistoryEntry::replaced(library.file_history_resource(path)?)
                    }
                    BaselineKind::Removed => {
                        HistoryEntry::removed(library.file_history_resource(path)?)
                    }
                };
                Ok((path.clone(), entry))
            })
            .collect()
    }
}

/// A history entry whose backup is already in staging.
///
/// Produced by [`HistoryBuilder::stage`]; holds no entry when the record needs none.
#[derive(Debug)]
#[must_use]
pub struct StagedEntry {
    key: PathKey,
    entry: Option<(ModFilePath, BaselineKind)>,
}

/// A previous-history entry that has not been superseded during this run.
#[derive(Debug)]
struct CarriedEntry {
    path: ModFilePath,
    entry: HistoryEntry,
}

/// Accumulates the new baseline while an apply runs.
///
/// Every processed record supersedes the previous history's entry for its path.
/// Entries nothing superseded (a dropped location, a failed or skipped record)
/// are carried into the new history unchanged, so the original bytes they
/// protect are never lost.
#[derive(Debug)]
pub struct HistoryBuilder {
    staging_dir: Utf8PathBuf,
    recorded: BTreeMap<PathKey, (ModFilePath, BaselineKind)>,
    carried: BTreeMap<PathKey, CarriedEntry>,
}

impl HistoryBuilder {
    /// Create a builder writing backups into `staging_dir`.
    ///
    /// `previous` is the committed history this run replaces.
    pub fn new(
        staging_dir: Utf8PathBuf,
        previous: impl IntoIterator<Item = (ModFilePath, HistoryEntry)>,
    ) -> Self {
        let carried = previous
            .into_iter()
            .map(|(path, entry)| (path.key(), CarriedEntry { path, entry }))
            .collect();

        Self {
            staging_dir,
            recorded: BTreeMap::new(),
            carried,
        }
    }

    pub fn staging_dir(&self) -> &Utf8Path {
        &self.staging_dir
    }

    /// Record the outcome of an applied record.
    ///
    /// Shorthand for [`stage`](Self::stage) followed by
    /// [`commit_entry`](Self::commit_entry).
    pub fn record(
        &mut self,
        record: &FileChangeRecord,
        existed: bool,
        captured: Option<SharedResource>,
    ) -> Result<()> {
        let staged = self.stage(record, existed, captured)?;
        self.commit_entry(staged);
        Ok(())
    }

    /// Write the backup a record needs into staging, before its target changes.
    ///
    /// `existed` tells whether the target existed before the record ran and
    /// `captured` holds its bytes from before the record ran, when they were
    /// captured. Captures only happen for history-writing records without a
    /// prior baseline whose target existed.
    ///
    /// The history itself is untouched until the returned entry is passed to
    /// [`commit_entry`](Self::commit_entry).
    pub fn stage(
        &self,
        record: &FileChangeRecord,
        existed: bool,
        captured: Option<SharedResource>,
    ) -> Result<StagedEntry> {
        let key = record.path().key();
        if !record.writes_history() {
            return Ok(StagedEntry { key, entry: None });
        }

        let outcome = match (record.op(), record.prior_baseline()) {
            (RecordOp::Remove, Some(prior)) => match prior.kind() {
                BaselineKind::Added => None,
                _ => Some((BaselineKind::Removed, prior.original().cloned())),
            },
            (RecordOp::Remove, None) => existed.then(|| (BaselineKind::Removed, captured)),
            (_, Some(prior)) => match prior.kind() {
                BaselineKind::Added => Some((BaselineKind::Added, None)),
                _ => Some((BaselineKind::Replaced, prior.original().cloned())),
            },
            (RecordOp::Add(_), None) if existed => Some((BaselineKind::Replaced, captured)),
            (RecordOp::Add(_), None) => Some((BaselineKind::Added, None)),
            (RecordOp::PatchOnly, None) => existed.then(|| (BaselineKind::Replaced, captured)),
        };

        let Some((kind, original)) = outcome else {
            tracing::debug!("History: '{}' needs no entry", record.path());
            return Ok(StagedEntry { key, entry: None });
        };

        if kind != BaselineKind::Added {
            let original = original.ok_or_else(|| {
                Error::ContractViolation(format!(
                    "no original bytes available to protect '{}'",
                    record.path()
                ))
            })?;
            self.store(&key, &original)?;
        }

        Ok(StagedEntry {
            key,
            entry: Some((record.path().clone(), kind)),
        })
    }

    /// Make a staged entry part of the history, superseding the previous
    /// history's entry for its path.
    pub fn commit_entry(&mut self, staged: StagedEntry) {
        self.carried.remove(&staged.key);
        if let Some((path, kind)) = staged.entry {
            tracing::debug!("History: '{}' -> {:?}", path, kind);
            self.recorded.insert(staged.key, (path, kind));
        }
    }

    /// The history as it stands: recorded entries plus everything still carried over.
    pub fn snapshot(&self) -> LibraryFileHistory {
        let mut merged: BTreeMap<&PathKey, (&ModFilePath, BaselineKind)> = BTreeMap::new();
        for (key, carried) in &self.carried {
            merged.insert(key, (&carried.path, carried.entry.kind()));
        }
        for (key, (path, kind)) in &self.recorded {
            merged.insert(key, (path, *kind));
        }

        let mut history = LibraryFileHistory::default();
        for (path, kind) in merged.into_values() {
            let list = match kind {
                BaselineKind::Added => &mut history.added_files,
                BaselineKind::Replaced => &mut history.replaced_files,
                BaselineKind::Removed => &mut history.removed_files,
            };
            list.push(path.clone());
        }
        history
    }

    /// Persist the current snapshot so an interrupted run can be rolled forward.
    pub fn checkpoint(&self, library: &dyn ModLibrary) -> Result<()> {
        library.checkpoint_history(&self.snapshot())
    }

    /// Carry unsuperseded entries forward and swap the new history in.
    pub fn commit(mut self, library: &dyn ModLibrary) -> Result<LibraryFileHistory> {
        let carried = std::mem::take(&mut self.carried);
        if !carried.is_empty() {
            tracing::info!(
                "History: carrying {} unchanged entr{} forward",
                carried.len(),
                if carried.len() == 1 { "y" } else { "ies" }
            );
        }

        // A carried backup that can't be staged fails the commit. The previous
        // store stays in place and the checkpoint is rolled forward on the next read.
        for (key, CarriedEntry { path, entry }) in carried {
            if let Some(original) = entry.original() {
                self.store(&key, original).map_err(|e| {
                    tracing::error!("History: failed to carry backup of '{}': {}", path, e);
                    e
                })?;
            }
            self.recorded.insert(key, (path, entry.kind()));
        }

        let history = self.snapshot();
        library.checkpoint_history(&history)?;
        library.replace_file_history(&self.staging_dir)?;
        library.write_history(&history)?;

        tracing::info!(
            "History committed: added={} replaced={} removed={}",
            history.added_files.len(),
            history.replaced_files.len(),
            history.removed_files.len()
        );
        Ok(history)
    }

    /// Write the original bytes for `key` into the staging area.
    ///
    /// Bytes already in the old backup store are hard-linked, so the old store
    /// keeps its copy until the new one replaces it. Everything else is copied.
    fn store(&self, key: &PathKey, original: &SharedResource) -> Result<()> {
        std::fs::create_dir_all(self.staging_dir.as_std_path())?;
        let dest = self.staging_dir.join(backup_file_name(key));

        if let Some(backing) = original.history_backing() {
            if backing == dest {
                return Ok(());
            }
        }
        // Unlink first: `dest` may be a link to the bytes about to be read.
        if std::fs::symlink_metadata(dest.as_std_path()).is_ok() {
            std::fs::remove_file(dest.as_std_path())?;
        }

        if let Some(backing) = original.history_backing() {
            match std::fs::hard_link(backing.as_std_path(), dest.as_std_path()) {
                Ok(()) => return Ok(()),
                Err(e) => tracing::debug!(
                    "History: link of {} failed ({}), copying instead",
                    backing,
                    e
                ),
            }
        }

        let mut reader = original.open()?;
        let mut file = std::fs::File::create(dest.as_std_path())?;
        std::io::copy(&mut reader, &mut file)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordSource;
    use crate::resource::{HistoryResource, MemoryResource};
    use modstack_project::FilePatch;
    use std::sync::Arc;

    fn staging() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("staging")).unwrap();
        (dir, path)
    }

    fn memory(path: &ModFilePath, bytes: &[u8]) -> SharedResource {
        Arc::new(MemoryResource::new(path.clone(), bytes.to_vec()))
    }

    fn read_backup(builder: &HistoryBuilder, path: &ModFilePath) -> Vec<u8> {
        std::fs::read(builder.staging_dir().join(backup_file_name(&path.key()))).unwrap()
    }

    fn add(path: &ModFilePath, bytes: &[u8]) -> FileChangeRecord {
        FileChangeRecord::add(path.clone(), memory(path, bytes), RecordSource::FromMod)
    }

    #[test]
    fn test_add_without_prior_on_missing_file_is_added() {
        let (_guard, dir) = staging();
        let mut builder = HistoryBuilder::new(dir, Vec::new());
        let path = ModFilePath::physical("data/new.txt");

        builder.record(&add(&path, b"B"), false, None).unwrap();

        let history = builder.snapshot();
        assert_eq!(history.added_files, vec![path]);
        assert!(history.replaced_files.is_empty());
    }

    #[test]
    fn test_add_over_existing_file_captures_original() {
        let (_guard, dir) = staging();
        let mut builder = HistoryBuilder::new(dir, Vec::new());
        let path = ModFilePath::physical("data/foo.txt");

        builder
            .record(&add(&path, b"B"), true, Some(memory(&path, b"A")))
            .unwrap();

        assert_eq!(builder.snapshot().replaced_files, vec![path.clone()]);
        assert_eq!(read_backup(&builder, &path), b"A");
    }

    #[test]
    fn test_prior_original_is_kept_over_current_bytes() {
        let (_guard, dir) = staging();
        let mut builder = HistoryBuilder::new(dir, Vec::new());
        let path = ModFilePath::physical("data/foo.txt");

        let record = add(&path, b"C").with_prior_baseline(HistoryEntry::replaced(memory(&path, b"A")));
        builder.record(&record, true, None).unwrap();

        assert_eq!(builder.snapshot().replaced_files, vec![path.clone()]);
        assert_eq!(read_backup(&builder, &path), b"A");
    }

    #[test]
    fn test_add_over_removed_prior_becomes_replaced() {
        let (_guard, dir) = staging();
        let mut builder = HistoryBuilder::new(dir, Vec::new());
        let path = ModFilePath::physical("data/bar.txt");

        let record = add(&path, b"D").with_prior_baseline(HistoryEntry::removed(memory(&path, b"C")));
        builder.record(&record, false, None).unwrap();

        let history = builder.snapshot();
        assert_eq!(history.replaced_files, vec![path.clone()]);
        assert!(history.removed_files.is_empty());
        assert_eq!(read_backup(&builder, &path), b"C");
    }

    #[test]
    fn test_add_over_added_prior_stays_added() {
        let (_guard, dir) = staging();
        let mut builder = HistoryBuilder::new(dir, Vec::new());
        let path = ModFilePath::physical("data/new.txt");

        let record = add(&path, b"B").with_prior_baseline(HistoryEntry::added());
        builder.record(&record, true, None).unwrap();

        assert_eq!(builder.snapshot().added_files, vec![path]);
    }

    #[test]
    fn test_remove_rules() {
        let (_guard, dir) = staging();
        let mut builder = HistoryBuilder::new(dir, Vec::new());

        let was_added = ModFilePath::physical("a.txt");
        let record = FileChangeRecord::remove(was_added.clone(), RecordSource::FromMod)
            .with_prior_baseline(HistoryEntry::added());
        builder.record(&record, true, None).unwrap();

        let was_replaced = ModFilePath::physical("b.txt");
        let record = FileChangeRecord::remove(was_replaced.clone(), RecordSource::FromMod)
            .with_prior_baseline(HistoryEntry::replaced(memory(&was_replaced, b"orig-b")));
        builder.record(&record, true, None).unwrap();

        let existing = ModFilePath::physical("c.txt");
        let record = FileChangeRecord::remove(existing.clone(), RecordSource::FromMod);
        builder
            .record(&record, true, Some(memory(&existing, b"orig-c")))
            .unwrap();

        let absent = ModFilePath::physical("d.txt");
        let record = FileChangeRecord::remove(absent, RecordSource::FromMod);
        builder.record(&record, false, None).unwrap();

        let history = builder.snapshot();
        assert!(history.added_files.is_empty());
        assert!(history.replaced_files.is_empty());
        assert_eq!(history.removed_files, vec![was_replaced.clone(), existing.clone()]);
        assert_eq!(read_backup(&builder, &was_replaced), b"orig-b");
        assert_eq!(read_backup(&builder, &existing), b"orig-c");
    }

    #[test]
    fn test_patch_only_on_existing_file_is_replaced() {
        let (_guard, dir) = staging();
        let mut builder = HistoryBuilder::new(dir, Vec::new());
        let path = ModFilePath::physical("cfg.ini");

        let record = FileChangeRecord::patch_only(
            path.clone(),
            vec![FilePatch::Append { data: b"!".to_vec() }],
        )
        .unwrap();
        builder
            .record(&record, true, Some(memory(&path, b"x=1")))
            .unwrap();

        assert_eq!(builder.snapshot().replaced_files, vec![path.clone()]);
        assert_eq!(read_backup(&builder, &path), b"x=1");
    }

    #[test]
    fn test_history_records_supersede_without_writing() {
        let (_guard, dir) = staging();
        let path = ModFilePath::physical("a.txt");
        let previous = vec![(path.clone(), HistoryEntry::added())];
        let mut builder = HistoryBuilder::new(dir, previous);

        assert_eq!(builder.snapshot().added_files, vec![path.clone()]);

        let revert = FileChangeRecord::remove(path, RecordSource::FromHistory)
            .with_prior_baseline(HistoryEntry::added());
        builder.record(&revert, true, None).unwrap();

        assert!(builder.snapshot().is_empty());
    }

    #[test]
    fn test_missing_capture_is_contract_violation() {
        let (_guard, dir) = staging();
        let mut builder = HistoryBuilder::new(dir, Vec::new());
        let path = ModFilePath::physical("a.txt");

        let err = builder.record(&add(&path, b"B"), true, None).unwrap_err();
        assert!(matches!(err, Error::ContractViolation(_)));
    }

    #[test]
    fn test_history_backed_original_is_linked_not_moved() {
        let (guard, dir) = staging();
        let old_store = Utf8PathBuf::from_path_buf(guard.path().join("old")).unwrap();
        std::fs::create_dir_all(&old_store).unwrap();
        let path = ModFilePath::physical("data/foo.txt");
        let backing = old_store.join(backup_file_name(&path.key()));
        std::fs::write(&backing, b"A").unwrap();

        let original: SharedResource = Arc::new(HistoryResource::new(path.clone(), backing.clone()));
        let mut builder = HistoryBuilder::new(dir, Vec::new());
        let record = add(&path, b"B").with_prior_baseline(HistoryEntry::replaced(original.clone()));
        builder.record(&record, true, None).unwrap();

        // The old store keeps its copy, so the record's own resource stays readable.
        assert_eq!(std::fs::read(&backing).unwrap(), b"A");
        assert_eq!(original.read_all().unwrap(), b"A");
        assert_eq!(read_backup(&builder, &path), b"A");

        // Staging the same key again must not truncate the shared bytes.
        builder.record(&record, true, None).unwrap();
        assert_eq!(read_backup(&builder, &path), b"A");
        assert_eq!(std::fs::read(&backing).unwrap(), b"A");
    }

    #[test]
    fn test_staged_entry_is_not_history_until_committed() {
        let (_guard, dir) = staging();
        let path = ModFilePath::physical("data/foo.txt");
        let previous = vec![(path.clone(), HistoryEntry::added())];
        let mut builder = HistoryBuilder::new(dir, previous);

        let other = ModFilePath::physical("data/bar.txt");
        let staged = builder
            .stage(&add(&other, b"B"), true, Some(memory(&other, b"A")))
            .unwrap();

        // The backup is durable before anything else happens.
        assert_eq!(read_backup(&builder, &other), b"A");
        assert_eq!(builder.snapshot().replaced_files, Vec::<ModFilePath>::new());
        assert_eq!(builder.snapshot().added_files, vec![path.clone()]);

        builder.commit_entry(staged);
        assert_eq!(builder.snapshot().replaced_files, vec![other]);
        assert_eq!(builder.snapshot().added_files, vec![path]);
    }

    #[test]
    fn test_failed_staging_write_leaves_history_unchanged() {
        let (_guard, dir) = staging();
        let path = ModFilePath::physical("data/foo.txt");
        std::fs::create_dir_all(dir.join(backup_file_name(&path.key())).join("blocker")).unwrap();
        let builder = HistoryBuilder::new(dir, Vec::new());

        let result = builder.stage(&add(&path, b"B"), true, Some(memory(&path, b"A")));
        assert!(result.is_err());
        assert!(builder.snapshot().is_empty());
    }

    #[test]
    fn test_unstorable_carried_entry_fails_commit() {
        use crate::library::FsModLibrary;

        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(root.join("game")).unwrap();
        let library = FsModLibrary::new(root.join("game"), root.join("storage"));

        let foo = ModFilePath::physical("data/foo.txt");
        let bar = ModFilePath::physical("data/bar.txt");
        let mut first = HistoryBuilder::new(library.begin_history_staging().unwrap(), Vec::new());
        first.record(&add(&foo, b"B"), true, Some(memory(&foo, b"A"))).unwrap();
        first.record(&add(&bar, b"Y"), true, Some(memory(&bar, b"X"))).unwrap();
        let committed = first.commit(&library).unwrap();

        // Lose bar's backup, then run again touching only foo.
        let bar_backup = library.file_history_resource(&bar).unwrap();
        std::fs::remove_file(bar_backup.history_backing().unwrap()).unwrap();

        let previous = committed.load_entries(&library).unwrap();
        let mut second = HistoryBuilder::new(library.begin_history_staging().unwrap(), previous);
        let foo_prior = HistoryEntry::replaced(library.file_history_resource(&foo).unwrap());
        second
            .record(&add(&foo, b"C").with_prior_baseline(foo_prior), true, None)
            .unwrap();
        assert!(second.commit(&library).is_err());

        // The committed history and the backups it still has are untouched.
        assert_eq!(library.read_history().unwrap(), Some(committed));
        let foo_backup = library.file_history_resource(&foo).unwrap();
        assert_eq!(foo_backup.read_all().unwrap(), b"A");
    }

    #[test]
    fn test_history_serialization_format() {
        let history = LibraryFileHistory {
            replaced_files: vec![ModFilePath::physical("a.txt")],
            ..Default::default()
        };
        let json = serde_json::to_string(&history).unwrap();
        assert!(json.contains("\"version\":1"));
        assert!(json.contains("\"replacedFiles\":[{\"filePath\":\"a.txt\"}]"));

        let parsed: LibraryFileHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, history);
        assert_eq!(parsed.len(), 1);
    }
}
