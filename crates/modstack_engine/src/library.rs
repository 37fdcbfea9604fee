//! Mod library storage.
//!
//! The engine never reads or writes library storage directly; it goes through the
//! [`ModLibrary`] trait. [`FsModLibrary`] is the filesystem implementation:
//!
//! ```text
//! storage/
//!   library.json        # installed mods in priority order
//!   mods/<id>/          # installed mod packages
//!   history.json        # committed file history
//!   history/            # backup store (<xxh3>.bak files)
//!   history.next/       # staging area while an apply runs (+ checkpoint.json)
//! ```
//!
//! # Crash recovery
//!
//! [`read_history`](ModLibrary::read_history) rolls an interrupted apply forward
//! before returning anything: a half-finished store swap is completed, backups
//! left in staging are moved back into the store, and the newest checkpoint (if
//! any) becomes `history.json`.

use crate::error::{Error, Result};
use crate::history::LibraryFileHistory;
use crate::mod_package::{load_project, Mod};
use crate::path::ModFilePath;
use crate::resource::{HistoryResource, SharedResource};
use crate::utils::{backup_file_name, read_json, write_json_atomic};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use modstack_project::DEFAULT_VARIANT;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Current schema version of `library.json`.
pub const MANIFEST_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "library.json";
const MODS_DIR: &str = "mods";
const HISTORY_FILE: &str = "history.json";
const HISTORY_STORE_DIR: &str = "history";
const HISTORY_STAGING_DIR: &str = "history.next";
const HISTORY_OLD_DIR: &str = "history.old";
const CHECKPOINT_FILE: &str = "checkpoint.json";

fn default_variant() -> String {
    DEFAULT_VARIANT.to_string()
}

fn default_true() -> bool {
    true
}

/// An installed mod as listed in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModManifestEntry {
    pub id: String,
    pub installed_at: DateTime<Utc>,
    #[serde(default = "default_variant")]
    pub variant: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// The library manifest (`library.json`). Mods are listed in priority order,
/// highest priority first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModManifest {
    pub version: u32,
    #[serde(default)]
    pub mods: Vec<ModManifestEntry>,
}

impl Default for ModManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            mods: Vec::new(),
        }
    }
}

impl ModManifest {
    pub fn find(&self, id: &str) -> Option<&ModManifestEntry> {
        self.mods.iter().find(|m| m.id == id)
    }

    /// Enabled mods in priority order.
    pub fn enabled(&self) -> impl Iterator<Item = &ModManifestEntry> {
        self.mods.iter().filter(|m| m.enabled)
    }
}

/// Storage the engine reads mods and history from and writes history to.
pub trait ModLibrary {
    /// Root of the installation mods are applied to.
    fn install_root(&self) -> &Utf8Path;

    fn read_mod_manifest(&self) -> Result<ModManifest>;

    /// Load an installed mod with the variant its manifest entry selects.
    fn read_installed_mod(&self, id: &str) -> Result<Mod>;

    /// Read the committed history, recovering from an interrupted apply first.
    fn read_history(&self) -> Result<Option<LibraryFileHistory>>;

    /// The backed-up original bytes of `path` in the committed store.
    fn file_history_resource(&self, path: &ModFilePath) -> Result<SharedResource>;

    /// Create a fresh, empty staging area for a new history's backups.
    fn begin_history_staging(&self) -> Result<Utf8PathBuf>;

    /// Persist an intermediate history into the staging area.
    fn checkpoint_history(&self, history: &LibraryFileHistory) -> Result<()>;

    /// Make `staging` the backup store, discarding the previous store.
    fn replace_file_history(&self, staging: &Utf8Path) -> Result<()>;

    /// Commit `history` as the library's history.
    fn write_history(&self, history: &LibraryFileHistory) -> Result<()>;
}

/// Filesystem-backed mod library.
#[derive(Debug, Clone)]
pub struct FsModLibrary {
    install_root: Utf8PathBuf,
    storage_dir: Utf8PathBuf,
}

impl FsModLibrary {
    pub fn new(install_root: impl Into<Utf8PathBuf>, storage_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            storage_dir: storage_dir.into(),
        }
    }

    pub fn storage_dir(&self) -> &Utf8Path {
        &self.storage_dir
    }

    pub fn mod_dir(&self, id: &str) -> Utf8PathBuf {
        self.storage_dir.join(MODS_DIR).join(id)
    }

    fn manifest_path(&self) -> Utf8PathBuf {
        self.storage_dir.join(MANIFEST_FILE)
    }

    fn history_path(&self) -> Utf8PathBuf {
        self.storage_dir.join(HISTORY_FILE)
    }

    fn history_store(&self) -> Utf8PathBuf {
        self.storage_dir.join(HISTORY_STORE_DIR)
    }

    fn history_staging(&self) -> Utf8PathBuf {
        self.storage_dir.join(HISTORY_STAGING_DIR)
    }

    fn history_old(&self) -> Utf8PathBuf {
        self.storage_dir.join(HISTORY_OLD_DIR)
    }

    fn save_manifest(&self, manifest: &ModManifest) -> Result<()> {
        write_json_atomic(&self.manifest_path(), manifest)
    }

    /// Installed mods in priority order.
    pub fn list_mods(&self) -> Result<Vec<ModManifestEntry>> {
        Ok(self.read_mod_manifest()?.mods)
    }

    /// Copy the mod package at `source` into the library.
    ///
    /// The mod gets a new id, is enabled and takes the highest priority. The
    /// package is validated by loading it with `variant` before anything is copied.
    pub fn install_mod_from_dir(&self, source: &Utf8Path, variant: &str) -> Result<ModManifestEntry> {
        if !source.as_std_path().is_dir() {
            return Err(Error::InvalidMod {
                id: source.to_string(),
                reason: "not a directory".to_string(),
            });
        }
        let loaded = Mod::load(source.as_str(), source, variant)?;

        let mut manifest = self.read_mod_manifest()?;
        let id = Uuid::new_v4().to_string();
        let mod_dir = self.mod_dir(&id);
        copy_dir(source, &mod_dir)?;

        let entry = ModManifestEntry {
            id,
            installed_at: Utc::now(),
            variant: loaded.variant().to_string(),
            enabled: true,
        };
        manifest.mods.insert(0, entry.clone());
        self.save_manifest(&manifest)?;

        tracing::info!(
            "Installed mod {} ({}) from {} into {}",
            entry.id,
            loaded.project().name,
            source,
            mod_dir
        );
        Ok(entry)
    }

    pub fn set_mod_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut manifest = self.read_mod_manifest()?;
        let entry = manifest
            .mods
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::ModNotFound(id.to_string()))?;
        entry.enabled = enabled;
        self.save_manifest(&manifest)?;

        tracing::info!("Mod {} {}", id, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Change the variant a mod is applied with. The variant must exist in the package.
    pub fn set_mod_variant(&self, id: &str, variant: &str) -> Result<()> {
        let mut manifest = self.read_mod_manifest()?;
        let mod_dir = self.mod_dir(id);
        let entry = manifest
            .mods
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::ModNotFound(id.to_string()))?;

        let project = load_project(id, &mod_dir)?;
        let resolved = project.variant(variant).ok_or_else(|| Error::InvalidMod {
            id: id.to_string(),
            reason: format!("unknown variant '{}'", variant),
        })?;
        entry.variant = resolved.name;
        self.save_manifest(&manifest)
    }

    /// Reorder installed mods. `ids` must list every installed mod exactly once.
    pub fn reorder_mods(&self, ids: &[String]) -> Result<()> {
        let mut manifest = self.read_mod_manifest()?;

        let mut installed: Vec<&str> = manifest.mods.iter().map(|m| m.id.as_str()).collect();
        installed.sort_unstable();
        let mut requested: Vec<&str> = ids.iter().map(String::as_str).collect();
        requested.sort_unstable();
        if installed != requested {
            return Err(Error::InvalidLibrary(
                "provided mod ids do not match the installed mods".to_string(),
            ));
        }

        let mut reordered = Vec::with_capacity(manifest.mods.len());
        for id in ids {
            if let Some(pos) = manifest.mods.iter().position(|m| &m.id == id) {
                reordered.push(manifest.mods.remove(pos));
            }
        }
        manifest.mods = reordered;
        self.save_manifest(&manifest)
    }

    /// Remove a mod from the manifest and delete its package.
    ///
    /// Files it changed in the installation stay until the next apply reverts them.
    pub fn uninstall_mod(&self, id: &str) -> Result<()> {
        let mut manifest = self.read_mod_manifest()?;
        let pos = manifest
            .mods
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| Error::ModNotFound(id.to_string()))?;
        manifest.mods.remove(pos);
        self.save_manifest(&manifest)?;

        let mod_dir = self.mod_dir(id);
        if mod_dir.as_std_path().exists() {
            std::fs::remove_dir_all(mod_dir.as_std_path())?;
            tracing::info!("Deleted mod package at {}", mod_dir);
        }
        Ok(())
    }

    /// Roll an interrupted apply forward. See the module docs.
    fn recover_history(&self) -> Result<()> {
        let store = self.history_store();
        let old = self.history_old();
        let staging = self.history_staging();

        if old.as_std_path().exists() {
            if store.as_std_path().exists() {
                std::fs::remove_dir_all(old.as_std_path())?;
            } else {
                tracing::warn!("Recovery: restoring backup store from {}", old);
                std::fs::rename(old.as_std_path(), store.as_std_path())?;
            }
        }

        let committed_checkpoint = store.join(CHECKPOINT_FILE);
        if committed_checkpoint.as_std_path().exists() {
            tracing::warn!("Recovery: adopting checkpoint left in the backup store");
            std::fs::rename(
                committed_checkpoint.as_std_path(),
                self.history_path().as_std_path(),
            )?;
        }

        if staging.as_std_path().exists() {
            tracing::warn!("Recovery: rolling interrupted apply forward from {}", staging);
            std::fs::create_dir_all(store.as_std_path())?;

            for entry in std::fs::read_dir(staging.as_std_path())? {
                let entry = entry?;
                let name = entry.file_name();
                if name == CHECKPOINT_FILE || !entry.file_type()?.is_file() {
                    continue;
                }
                std::fs::rename(entry.path(), store.as_std_path().join(&name))?;
            }

            let checkpoint = staging.join(CHECKPOINT_FILE);
            if checkpoint.as_std_path().exists() {
                std::fs::rename(checkpoint.as_std_path(), self.history_path().as_std_path())?;
            }
            std::fs::remove_dir_all(staging.as_std_path())?;
        }

        Ok(())
    }
}

impl ModLibrary for FsModLibrary {
    fn install_root(&self) -> &Utf8Path {
        &self.install_root
    }

    fn read_mod_manifest(&self) -> Result<ModManifest> {
        let manifest: ModManifest = read_json(&self.manifest_path())?.unwrap_or_default();
        if manifest.version > MANIFEST_VERSION {
            return Err(Error::InvalidLibrary(format!(
                "library.json version {} is newer than supported version {}",
                manifest.version, MANIFEST_VERSION
            )));
        }
        Ok(manifest)
    }

    fn read_installed_mod(&self, id: &str) -> Result<Mod> {
        let manifest = self.read_mod_manifest()?;
        let entry = manifest
            .find(id)
            .ok_or_else(|| Error::ModNotFound(id.to_string()))?;
        Mod::load(id, &self.mod_dir(id), &entry.variant)
    }

    fn read_history(&self) -> Result<Option<LibraryFileHistory>> {
        self.recover_history()?;
        read_json(&self.history_path())
    }

    fn file_history_resource(&self, path: &ModFilePath) -> Result<SharedResource> {
        let backup = self.history_store().join(backup_file_name(&path.key()));
        Ok(Arc::new(HistoryResource::new(path.clone(), backup)))
    }

    fn begin_history_staging(&self) -> Result<Utf8PathBuf> {
        let staging = self.history_staging();
        if staging.as_std_path().exists() {
            std::fs::remove_dir_all(staging.as_std_path())?;
        }
        std::fs::create_dir_all(staging.as_std_path())?;
        Ok(staging)
    }

    fn checkpoint_history(&self, history: &LibraryFileHistory) -> Result<()> {
        write_json_atomic(&self.history_staging().join(CHECKPOINT_FILE), history)
    }

    fn replace_file_history(&self, staging: &Utf8Path) -> Result<()> {
        let store = self.history_store();
        let old = self.history_old();

        if store.as_std_path().exists() {
            std::fs::rename(store.as_std_path(), old.as_std_path())?;
        }
        if staging.as_std_path().exists() {
            std::fs::rename(staging.as_std_path(), store.as_std_path())?;
        } else {
            std::fs::create_dir_all(store.as_std_path())?;
        }
        if old.as_std_path().exists() {
            std::fs::remove_dir_all(old.as_std_path())?;
        }
        Ok(())
    }

    fn write_history(&self, history: &LibraryFileHistory) -> Result<()> {
        write_json_atomic(&self.history_path(), history)?;

        let checkpoint = self.history_store().join(CHECKPOINT_FILE);
        if checkpoint.as_std_path().exists() {
            std::fs::remove_file(checkpoint.as_std_path())?;
        }
        Ok(())
    }
}

fn copy_dir(source: &Utf8Path, dest: &Utf8Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(source.as_std_path()) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(source.as_std_path())
            .map_err(|e| Error::Other(e.to_string()))?;
        let target = dest.as_std_path().join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
