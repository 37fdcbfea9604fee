//! Per-location change sets and their application.
//!
//! Every record of an apply targets exactly one location: the installation root
//! or a single archive file. A [`LocationChangeSet`] owns the records of one
//! location, merges competing records for the same path, and applies them
//! either directly to the filesystem or by rewriting the archive.

use crate::archive::{ArchiveCodec, ArchiveEntry, RepackResult};
use crate::error::{Error, Result};
use crate::history::{HistoryBuilder, StagedEntry};
use crate::path::{ModFilePath, PathKey};
use crate::record::{FileChangeRecord, RecordOp};
use crate::resource::{MemoryResource, SharedResource};
use crate::utils::{normalize_path, prune_empty_dirs, resolve_entry_name, resolve_under_root};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress units per record.
pub const RECORD_PROGRESS_UNITS: u64 = 100;

/// What the engine lends a location while it is applied.
pub struct ApplyContext<'a> {
    pub install_root: &'a Utf8Path,
    pub history: &'a mut HistoryBuilder,
    pub stop: &'a AtomicBool,
    /// Receives the units completed within this location, out of
    /// `len() * RECORD_PROGRESS_UNITS`.
    pub progress: &'a dyn Fn(u64),
}

impl ApplyContext<'_> {
    fn check_stop(&self) -> Result<()> {
        if self.stop.load(Ordering::Relaxed) {
            return Err(Error::Stopped);
        }
        Ok(())
    }
}

/// Summary of one applied location.
#[derive(Debug, Clone, Default)]
pub struct LocationOutcome {
    /// Records that ran against their target.
    pub records_applied: usize,
    /// Records skipped because their path escapes the installation root.
    pub skipped: Vec<ModFilePath>,
    /// The archive file that was rewritten, if any.
    pub repacked: Option<Utf8PathBuf>,
    pub repack: Option<RepackResult>,
}

/// The state of a record's target until it is finalized.
enum Target {
    /// Not read or replaced yet.
    Unopened,
    /// Bytes in memory, already modified.
    Contents(Vec<u8>),
    /// To be replaced by the resource's bytes.
    Source(SharedResource),
    MarkedForDeletion,
}

impl Target {
    fn into_bytes(self) -> Result<Option<Vec<u8>>> {
        match self {
            Target::Contents(bytes) => Ok(Some(bytes)),
            Target::Source(resource) => resource.read_all().map(Some),
            Target::Unopened | Target::MarkedForDeletion => Ok(None),
        }
    }
}

/// Run `record` against its target, returning the final target state and the
/// original bytes captured for history, if any.
///
/// `read_current` is called at most once, and only when the target `existed`.
fn run_record<F>(
    record: &FileChangeRecord,
    existed: bool,
    mut read_current: F,
) -> Result<(Target, Option<SharedResource>)>
where
    F: FnMut() -> Result<Vec<u8>>,
{
    let mut current: Option<Vec<u8>> = None;
    let captured = if record.writes_history() && record.prior_baseline().is_none() && existed {
        let bytes = read_current()?;
        let resource: SharedResource =
            Arc::new(MemoryResource::new(record.path().clone(), bytes.clone()));
        current = Some(bytes);
        Some(resource)
    } else {
        None
    };

    let mut target = match record.op() {
        RecordOp::Add(resource) => Target::Source(resource.clone()),
        RecordOp::Remove => Target::MarkedForDeletion,
        RecordOp::PatchOnly => Target::Unopened,
    };

    for patch in record.patches() {
        let mut bytes = match std::mem::replace(&mut target, Target::Unopened) {
            Target::Contents(bytes) => bytes,
            Target::Source(resource) => resource.read_all()?,
            Target::Unopened if existed => match current.take() {
                Some(bytes) => bytes,
                None => read_current()?,
            },
            Target::Unopened => {
                tracing::warn!(
                    "Skipping {} patch(es) for '{}': target does not exist",
                    record.patches().len(),
                    record.path()
                );
                break;
            }
            Target::MarkedForDeletion => {
                target = Target::MarkedForDeletion;
                break;
            }
        };

        patch.apply(&mut bytes).map_err(|source| Error::Patch {
            path: record.path().to_string(),
            source,
        })?;
        target = Target::Contents(bytes);
    }

    Ok((target, captured))
}

/// Write the final target state to a physical file.
fn finalize_physical(target: Target, file: &Utf8Path, root: &Utf8Path) -> Result<()> {
    match target {
        Target::Unopened => {}
        Target::Contents(bytes) => {
            ensure_parent(file)?;
            std::fs::write(file.as_std_path(), bytes)?;
        }
        Target::Source(resource) => {
            ensure_parent(file)?;
            let mut reader = resource.open()?;
            let mut out = std::fs::File::create(file.as_std_path())?;
            std::io::copy(&mut reader, &mut out)?;
        }
        Target::MarkedForDeletion => {
            if file.as_std_path().is_file() {
                std::fs::remove_file(file.as_std_path())?;
                if let Some(parent) = file.parent() {
                    prune_empty_dirs(parent, root);
                }
            }
        }
    }
    Ok(())
}

fn ensure_parent(file: &Utf8Path) -> Result<()> {
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent.as_std_path())?;
    }
    Ok(())
}

/// All records targeting one location, keyed by normalized path.
#[derive(Debug)]
pub struct LocationChangeSet {
    location: String,
    location_id: String,
    records: Vec<FileChangeRecord>,
    index: HashMap<PathKey, usize>,
}

impl LocationChangeSet {
    pub fn new(location: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            location_id: location_id.into(),
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// A change set for the installation root itself.
    pub fn physical() -> Self {
        Self::new(String::new(), String::new())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    pub fn is_physical(&self) -> bool {
        normalize_path(&self.location).is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order of their paths.
    pub fn records(&self) -> &[FileChangeRecord] {
        &self.records
    }

    pub fn get(&self, path: &ModFilePath) -> Option<&FileChangeRecord> {
        self.index.get(&path.key()).map(|&i| &self.records[i])
    }

    /// Merge `record` into the set.
    ///
    /// A patch-only record layers its patches onto whatever already occupies the
    /// path. Any other record takes the path over and inherits the occupant's
    /// prior baseline unless it has its own. Taking over a path that already
    /// carries patches is a [`Error::ContractViolation`]: patches must be
    /// scheduled after every add and remove.
    pub fn insert(&mut self, mut record: FileChangeRecord) -> Result<()> {
        let key = record.path().key();

        let Some(&i) = self.index.get(&key) else {
            let record = if record.is_patch_only() {
                let mut placeholder = FileChangeRecord::placeholder(record.path().clone());
                placeholder.attach_patches(record.take_patches());
                placeholder
            } else {
                record
            };
            self.index.insert(key, self.records.len());
            self.records.push(record);
            return Ok(());
        };

        let occupant = &mut self.records[i];
        if record.is_patch_only() {
            occupant.attach_patches(record.take_patches());
            return Ok(());
        }

        if !occupant.patches().is_empty() {
            return Err(Error::ContractViolation(format!(
                "'{}' was replaced after patches were layered onto it",
                record.path()
            )));
        }

        tracing::debug!("'{}': {:?} overrides {:?}", record.path(), record.op(), occupant.op());
        record.inherit_prior_baseline(occupant.prior_baseline().cloned());
        *occupant = record;
        Ok(())
    }

    /// Apply every record directly to files under the installation root.
    pub fn apply_physical(self, ctx: &mut ApplyContext<'_>) -> Result<LocationOutcome> {
        let root = ctx.install_root;
        let mut outcome = LocationOutcome::default();

        for (done, record) in self.records.iter().enumerate() {
            ctx.check_stop()?;

            match resolve_under_root(root, &record.path().file_path) {
                Ok(file) => {
                    let existed = file.as_std_path().is_file();
                    let (target, captured) =
                        run_record(record, existed, || Ok(std::fs::read(file.as_std_path())?))?;
                    let staged = ctx.history.stage(record, existed, captured)?;
                    finalize_physical(target, &file, root)?;
                    ctx.history.commit_entry(staged);
                    outcome.records_applied += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping '{}': {}", record.path(), e);
                    outcome.skipped.push(record.path().clone());
                }
            }

            (ctx.progress)((done as u64 + 1) * RECORD_PROGRESS_UNITS);
        }

        tracing::info!(
            "Applied {} record(s) to the installation root, skipped {}",
            outcome.records_applied,
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    /// Apply every record by rewriting the archive at this location.
    ///
    /// Existing entries are visited first, in archive order; records matching no
    /// entry are appended afterwards. The rewritten archive replaces the original
    /// only once it is complete. Backups are staged before that replacement and
    /// the location's history entries are committed only after it succeeded.
    pub fn apply_archive(
        self,
        codec: &dyn ArchiveCodec,
        ctx: &mut ApplyContext<'_>,
    ) -> Result<LocationOutcome> {
        let mut outcome = LocationOutcome::default();

        let archive_path = match resolve_under_root(ctx.install_root, &self.location) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Skipping archive '{}': {}", self.location, e);
                outcome.skipped = self.records.iter().map(|r| r.path().clone()).collect();
                return Ok(outcome);
            }
        };
        if !archive_path.as_std_path().is_file() {
            return Err(Error::ArchiveNotFound(archive_path));
        }

        let total_units = self.records.len() as u64 * RECORD_PROGRESS_UNITS;
        let half = total_units / 2;

        let mut reader = codec.open(&archive_path)?;
        let mut contents = reader.contents()?;
        let entry_total = contents.entry_count().max(1) as u64;

        let names: Vec<String> = self
            .records
            .iter()
            .map(|r| r.path().key().file().to_string())
            .collect();
        let lookup: HashMap<&str, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut matched = vec![false; self.records.len()];
        let mut staged: Vec<StagedEntry> = Vec::with_capacity(self.records.len());
        let mut modified = false;
        let mut scanned = 0u64;

        // Pass 1: existing entries.
        for directory in contents.directories.iter_mut() {
            let entries = std::mem::take(&mut directory.entries);
            let mut kept = Vec::with_capacity(entries.len());

            for entry in entries {
                ctx.check_stop()?;
                scanned += 1;
                (ctx.progress)(half * scanned / entry_total);

                if entry.is_directory {
                    kept.push(entry);
                    continue;
                }

                let name = normalize_path(&codec.combine_paths(&[&directory.name, &entry.name]));
                let Some(&i) = lookup.get(name.as_str()).filter(|&&i| !matched[i]) else {
                    kept.push(entry);
                    continue;
                };
                matched[i] = true;

                let record = &self.records[i];
                let (target, captured) = run_record(record, true, || reader.read_entry(&entry))?;
                staged.push(ctx.history.stage(record, true, captured)?);
                match target {
                    Target::Unopened => kept.push(entry),
                    Target::MarkedForDeletion => modified = true,
                    target => {
                        let mut entry = entry;
                        if let Some(bytes) = target.into_bytes()? {
                            reader.encode_entry(&mut entry, bytes)?;
                        }
                        kept.push(entry);
                        modified = true;
                    }
                }
                outcome.records_applied += 1;
            }

            directory.entries = kept;
        }

        // Pass 2: records that matched no entry.
        for (i, record) in self.records.iter().enumerate() {
            if matched[i] {
                continue;
            }
            ctx.check_stop()?;

            let name = match resolve_entry_name(&archive_path, &record.path().file_path) {
                Ok(name) => name,
                Err(e) => {
                    tracing::warn!("Skipping '{}': {}", record.path(), e);
                    outcome.skipped.push(record.path().clone());
                    continue;
                }
            };
            let (target, captured) = run_record(record, false, || {
                Err(Error::ContractViolation(format!(
                    "read of missing archive entry '{}'",
                    record.path()
                )))
            })?;
            staged.push(ctx.history.stage(record, false, captured)?);
            if let Some(bytes) = target.into_bytes()? {
                let (directory, mut entry): (String, ArchiveEntry) = reader.new_entry(&name);
                reader.encode_entry(&mut entry, bytes)?;
                contents.directory_mut(&directory).entries.push(entry);
                modified = true;
            }
            outcome.records_applied += 1;
        }
        (ctx.progress)(half);

        if modified {
            ctx.check_stop()?;
            let parent = archive_path
                .parent()
                .unwrap_or(ctx.install_root)
                .as_std_path()
                .to_path_buf();
            let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
            let write_span = total_units - half;
            let progress = ctx.progress;
            let result = reader.write(
                &contents,
                temp.as_file_mut(),
                &|done, total| {
                    let total = total.max(1) as u64;
                    progress(half + write_span * done as u64 / total);
                },
                ctx.stop,
            )?;
            temp.as_file().sync_all()?;
            drop(reader);
            temp.persist(archive_path.as_std_path()).map_err(|e| e.error)?;

            tracing::info!(
                "Repacked {} entries={} copied={} encoded={}",
                archive_path,
                result.entries_written,
                result.entries_copied,
                result.entries_encoded
            );
            outcome.repacked = Some(archive_path);
            outcome.repack = Some(result);
        } else {
            tracing::info!("Archive {} needs no changes", archive_path);
        }

        for entry in staged {
            ctx.history.commit_entry(entry);
        }
        (ctx.progress)(total_units);

        Ok(outcome)
    }
}
