//! The apply pipeline.
//!
//! [`ModEngine::apply`] takes the installation from whatever state the last apply
//! left it in to the state described by a new ordered list of mods.
//!
//! # Apply algorithm
//!
//! 1. Clear per-run state and read the committed history (recovering an
//!    interrupted apply first).
//! 2. Turn every history entry into a revert record: added paths are removed,
//!    replaced and removed paths get their original bytes back.
//! 3. Schedule every enabled mod's additions and removals, lowest priority first,
//!    so higher-priority mods take paths over.
//! 4. Schedule every mod's patches the same way. Patches always layer on top of
//!    whatever content wins a path.
//! 5. Resolve each archive location's codec. Locations without a codec are
//!    dropped with a warning.
//! 6. Apply each location into a shared [`HistoryBuilder`], checkpointing the
//!    history after every location. A failing location is logged and skipped.
//! 7. Run each codec's post-repack hook once with every archive it rewrote.
//! 8. Commit the new history, even after failures or cancellation.

use crate::archive::{ArchiveCodec, ArchiveRegistry};
use crate::error::{Error, Result};
use crate::history::{HistoryBuilder, LibraryFileHistory};
use crate::library::ModLibrary;
use crate::location::{ApplyContext, LocationChangeSet, RECORD_PROGRESS_UNITS};
use crate::mod_package::{load_enabled_mods, Mod};
use crate::path::ModFilePath;
use crate::record::{BaselineKind, FileChangeRecord, RecordSource};
use camino::Utf8PathBuf;
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Progress information emitted during an apply.
///
/// `current` and `total` are abstract units: every record is worth
/// [`RECORD_PROGRESS_UNITS`] and every codec in use adds its
/// [`repack_progress_length`](ArchiveCodec::repack_progress_length). `current`
/// never decreases within a run.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineProgress {
    pub stage: EngineStage,
    /// Location being applied (set during `ApplyingLocation`). Empty for the
    /// installation root.
    pub current_location: Option<String>,
    pub current: u64,
    pub total: u64,
}

/// Stages of an apply, emitted in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineStage {
    /// Reading and recovering the committed history.
    ReadingHistory,
    /// Building revert and mod records and merging them per location.
    Scheduling,
    /// Applying one location (repeated).
    ApplyingLocation,
    /// Running post-repack hooks of codecs that rewrote archives.
    FinishingArchives,
    /// Writing the new history.
    CommittingHistory,
    Complete,
}

/// A location that could not be applied.
#[derive(Debug, Clone)]
pub struct LocationFailure {
    pub location: String,
    pub error: String,
}

/// Summary returned after an apply.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Every location succeeded and the run was not cancelled.
    pub success: bool,
    /// The run was stopped through the stop flag.
    pub cancelled: bool,
    /// Locations applied in full.
    pub applied_locations: Vec<String>,
    pub failed_locations: Vec<LocationFailure>,
    /// Archive locations dropped because no codec handles them.
    pub dropped_locations: Vec<String>,
    /// Records skipped because their path escapes the installation root.
    pub skipped_records: Vec<ModFilePath>,
    /// Enabled mods that could not be loaded (only set by [`ModEngine::apply_library`]).
    pub skipped_mods: Vec<String>,
    /// Archive files rewritten during this run.
    pub repacked_archives: Vec<Utf8PathBuf>,
    /// The committed history.
    pub history: LibraryFileHistory,
    /// Wall-clock time for the entire apply.
    pub build_time: Duration,
}

type ProgressCallback = Arc<dyn Fn(EngineProgress) + Send + Sync>;

/// Applies ordered mod stacks to an installation and reverts previous applies.
///
/// Create an engine with [`new`](Self::new) (or [`Default`] for the built-in
/// codecs), optionally attach [`with_progress`](Self::with_progress) and
/// [`with_stop_flag`](Self::with_stop_flag), then call [`apply`](Self::apply).
/// The same engine can be reused; per-run state is cleared at the start of each apply.
pub struct ModEngine {
    registry: ArchiveRegistry,
    progress_callback: Option<ProgressCallback>,
    stop_flag: Arc<AtomicBool>,
    codec_cache: HashMap<String, Arc<dyn ArchiveCodec>>,
}

impl Default for ModEngine {
    fn default() -> Self {
        Self::new(ArchiveRegistry::with_defaults())
    }
}

impl ModEngine {
    pub fn new(registry: ArchiveRegistry) -> Self {
        Self {
            registry,
            progress_callback: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            codec_cache: HashMap::new(),
        }
    }

    /// Register a progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(EngineProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Use `flag` to stop a running apply. Setting it finishes the current step,
    /// leaves unprocessed locations untouched and still commits the history.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = flag;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    pub fn registry(&self) -> &ArchiveRegistry {
        &self.registry
    }

    /// Load every enabled mod from `library` and apply them.
    ///
    /// Mods that fail to load are skipped and listed in the outcome.
    pub fn apply_library(&mut self, library: &dyn ModLibrary) -> Result<ApplyOutcome> {
        let loaded = load_enabled_mods(library)?;
        let mut outcome = self.apply(library, &loaded.mods)?;
        outcome.skipped_mods = loaded.skipped.into_iter().map(|(id, _)| id).collect();
        Ok(outcome)
    }

    /// Apply `mods` (highest priority first) to the library's installation.
    ///
    /// Only [`Error::ContractViolation`] and failures to read or commit the history
    /// are returned as errors. Everything else is reported in the outcome.
    pub fn apply(&mut self, library: &dyn ModLibrary, mods: &[Mod]) -> Result<ApplyOutcome> {
        let start_time = std::time::Instant::now();
        let install_root = library.install_root().to_path_buf();
        self.codec_cache.clear();

        tracing::info!("Applying {} mod(s) to {}", mods.len(), install_root);
        self.emit_progress(EngineStage::ReadingHistory, None, 0, 0);

        let previous = library.read_history()?.unwrap_or_default();
        let previous_entries = previous.load_entries(library)?;
        tracing::info!("Previous history has {} entr(ies)", previous_entries.len());

        let staging = library.begin_history_staging()?;
        let mut history = HistoryBuilder::new(staging, previous_entries.iter().cloned());

        self.emit_progress(EngineStage::Scheduling, None, 0, 0);
        let mut schedule = Schedule::default();

        for (path, entry) in previous_entries {
            let record = match entry.kind() {
                BaselineKind::Added => FileChangeRecord::remove(path, RecordSource::FromHistory),
                BaselineKind::Replaced | BaselineKind::Removed => {
                    let original = entry.original().cloned().ok_or_else(|| {
                        Error::ContractViolation(format!(
                            "history entry for '{}' has no original bytes",
                            path
                        ))
                    })?;
                    FileChangeRecord::add(path, original, RecordSource::FromHistory)
                }
            };
            schedule.insert(record.with_prior_baseline(entry))?;
        }

        for m in mods.iter().rev() {
            tracing::debug!("Scheduling mod {} ({})", m.id(), m.project().name);
            for resource in m.added_files() {
                schedule.insert(FileChangeRecord::add(
                    resource.path().clone(),
                    resource.clone(),
                    RecordSource::FromMod,
                ))?;
            }
            for path in m.removed_files() {
                schedule.insert(FileChangeRecord::remove(path.clone(), RecordSource::FromMod))?;
            }
        }

        for m in mods.iter().rev() {
            for (path, patches) in m.patches() {
                schedule.insert(FileChangeRecord::patch_only(path.clone(), patches.clone())?)?;
            }
        }

        let mut outcome = ApplyOutcome {
            success: false,
            cancelled: false,
            applied_locations: Vec::new(),
            failed_locations: Vec::new(),
            dropped_locations: Vec::new(),
            skipped_records: Vec::new(),
            skipped_mods: Vec::new(),
            repacked_archives: Vec::new(),
            history: LibraryFileHistory::default(),
            build_time: Duration::ZERO,
        };

        let mut plan: Vec<(LocationChangeSet, Option<Arc<dyn ArchiveCodec>>)> = Vec::new();
        for set in schedule.sets {
            if set.is_physical() {
                plan.push((set, None));
                continue;
            }
            match self.resolve_codec(set.location(), set.location_id()) {
                Ok(codec) => plan.push((set, Some(codec))),
                Err(e) => {
                    tracing::warn!("Dropping {} record(s): {}", set.len(), e);
                    outcome.dropped_locations.push(set.location().to_string());
                }
            }
        }

        let mut codecs_in_use: BTreeMap<String, Arc<dyn ArchiveCodec>> = BTreeMap::new();
        for codec in plan.iter().filter_map(|(_, codec)| codec.as_ref()) {
            codecs_in_use
                .entry(codec.id().to_lowercase())
                .or_insert_with(|| codec.clone());
        }

        let record_units: u64 = plan
            .iter()
            .map(|(set, _)| set.len() as u64 * RECORD_PROGRESS_UNITS)
            .sum();
        let repack_units: u64 = codecs_in_use
            .values()
            .map(|codec| codec.repack_progress_length())
            .sum();
        let total = record_units + repack_units;
        let reported = Cell::new(0u64);
        let report = |stage: EngineStage, location: Option<&str>, current: u64| {
            let current = current.max(reported.get()).min(total);
            reported.set(current);
            self.emit_progress(stage, location.map(str::to_string), current, total);
        };

        let stop = self.stop_flag.clone();
        let mut repacked: BTreeMap<String, Vec<Utf8PathBuf>> = BTreeMap::new();
        let mut base = 0u64;

        for (set, codec) in plan {
            if stop.load(Ordering::Relaxed) {
                outcome.cancelled = true;
                break;
            }

            let location = set.location().to_string();
            let units = set.len() as u64 * RECORD_PROGRESS_UNITS;
            report(EngineStage::ApplyingLocation, Some(&location), base);
            tracing::info!(
                "Applying location '{}' records={}",
                display_location(&location),
                set.len()
            );

            let progress = |done: u64| {
                report(EngineStage::ApplyingLocation, Some(&location), base + done.min(units));
            };
            let mut ctx = ApplyContext {
                install_root: &install_root,
                history: &mut history,
                stop: &stop,
                progress: &progress,
            };
            let result = match &codec {
                None => set.apply_physical(&mut ctx),
                Some(codec) => set.apply_archive(codec.as_ref(), &mut ctx),
            };

            match result {
                Ok(applied) => {
                    outcome.skipped_records.extend(applied.skipped);
                    if let (Some(path), Some(codec)) = (applied.repacked, &codec) {
                        repacked
                            .entry(codec.id().to_lowercase())
                            .or_default()
                            .push(path);
                    }
                    outcome.applied_locations.push(location.clone());
                }
                Err(Error::Stopped) => {
                    tracing::warn!("Stopped while applying '{}'", display_location(&location));
                    outcome.cancelled = true;
                }
                Err(e) => {
                    let e = Error::location(display_location(&location), e);
                    if e.is_fatal() {
                        return Err(e);
                    }
                    tracing::error!("{}", e);
                    outcome.failed_locations.push(LocationFailure {
                        location: location.clone(),
                        error: e.to_string(),
                    });
                }
            }

            base += units;
            report(EngineStage::ApplyingLocation, Some(&location), base);

            if let Err(e) = history.checkpoint(library) {
                tracing::warn!("Failed to checkpoint history after '{}': {}", location, e);
            }
            if outcome.cancelled {
                break;
            }
        }

        for (codec_id, archives) in &repacked {
            let Some(codec) = codecs_in_use.get(codec_id) else {
                continue;
            };
            let length = codec.repack_progress_length();
            report(EngineStage::FinishingArchives, None, base);
            tracing::info!(
                "Running post-repack hook for codec '{}' archives={}",
                codec_id,
                archives.len()
            );

            let progress = |done: u64| {
                report(EngineStage::FinishingArchives, None, base + done.min(length));
            };
            match codec.on_archives_repacked(&install_root, archives, &progress, &stop) {
                Ok(()) => {}
                Err(Error::Stopped) => outcome.cancelled = true,
                Err(e) => {
                    tracing::error!("Post-repack hook for '{}' failed: {}", codec_id, e);
                    outcome.failed_locations.push(LocationFailure {
                        location: codec_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
            base += length;
        }
        outcome.repacked_archives = repacked.into_values().flatten().collect();

        report(EngineStage::CommittingHistory, None, base);
        outcome.history = history.commit(library)?;

        outcome.success = outcome.failed_locations.is_empty() && !outcome.cancelled;
        outcome.build_time = start_time.elapsed();
        report(EngineStage::Complete, None, total);

        tracing::info!(
            "Apply finished success={} cancelled={} applied={} failed={} dropped={} skipped_records={} elapsed_ms={}",
            outcome.success,
            outcome.cancelled,
            outcome.applied_locations.len(),
            outcome.failed_locations.len(),
            outcome.dropped_locations.len(),
            outcome.skipped_records.len(),
            outcome.build_time.as_millis()
        );
        Ok(outcome)
    }

    fn resolve_codec(&mut self, location: &str, location_id: &str) -> Result<Arc<dyn ArchiveCodec>> {
        let key = location_id.to_lowercase();
        if let Some(codec) = self.codec_cache.get(&key) {
            return Ok(codec.clone());
        }

        let codec = self
            .registry
            .get(&key)
            .ok_or_else(|| Error::MissingArchiveCodec {
                location: location.to_string(),
                location_id: location_id.to_string(),
            })?;
        self.codec_cache.insert(key, codec.clone());
        Ok(codec)
    }

    /// Emit a progress event if a callback was registered.
    fn emit_progress(&self, stage: EngineStage, current_location: Option<String>, current: u64, total: u64) {
        if let Some(callback) = &self.progress_callback {
            callback(EngineProgress {
                stage,
                current_location,
                current,
                total,
            });
        }
    }
}

fn display_location(location: &str) -> &str {
    if location.is_empty() {
        "<install root>"
    } else {
        location
    }
}

/// Per-run change sets, in order of first appearance of their location.
#[derive(Default)]
struct Schedule {
    sets: Vec<LocationChangeSet>,
    index: HashMap<String, usize>,
}

impl Schedule {
    fn insert(&mut self, record: FileChangeRecord) -> Result<()> {
        let key = record.path().location_key();
        let i = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                let path = record.path();
                self.sets.push(LocationChangeSet::new(
                    path.location.clone(),
                    path.location_id.clone(),
                ));
                self.index.insert(key, self.sets.len() - 1);
                self.sets.len() - 1
            }
        };
        self.sets[i].insert(record)
    }
}
