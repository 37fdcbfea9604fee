//! Installed mod packages.
//!
//! A [`Mod`] is read from a package directory in the library:
//!
//! ```text
//! mod_dir/
//!   mod.config.json | mod.config.toml     # project metadata (JSON preferred)
//!   content/
//!     default/                            # always applied
//!       data/foo.txt                      # physical file data/foo.txt
//!       data/packs/ui.zip/icons/a.png     # entry icons/a.png of archive data/packs/ui.zip
//!     high_res/                           # optional variant, layered over default
//!       ...
//! ```
//!
//! A path lands inside an archive when it is nested under one of the project's
//! declared [`ArchiveRegion`](modstack_project::ArchiveRegion)s; the longest
//! matching region wins. The same tagging applies to removed files and patches.

use crate::error::{Error, Result};
use crate::library::ModLibrary;
use crate::path::{ModFilePath, PathKey};
use crate::resource::{DiskResource, SharedResource};
use camino::{Utf8Path, Utf8PathBuf};
use modstack_project::{FilePatch, ModProject, ModVariant, CURRENT_FORMAT_VERSION, DEFAULT_VARIANT};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Directory holding variant content inside a mod package.
pub const CONTENT_DIR: &str = "content";

/// A loaded mod package, resolved for one variant.
#[derive(Debug)]
pub struct Mod {
    id: String,
    root: Utf8PathBuf,
    variant: String,
    project: ModProject,
    added_files: Vec<SharedResource>,
    removed_files: Vec<ModFilePath>,
    patches: Vec<(ModFilePath, Vec<FilePatch>)>,
}

impl Mod {
    /// Load the package at `root` for `variant`.
    ///
    /// Fails with [`Error::InvalidMod`] when the metadata is missing, can't be
    /// parsed or doesn't declare `variant`, and with [`Error::UnsupportedModFormat`]
    /// when it declares a newer format than this crate understands.
    pub fn load(id: impl Into<String>, root: &Utf8Path, variant: &str) -> Result<Self> {
        let id = id.into();
        let project = load_project(&id, root)?;

        if !project.is_supported_format() {
            return Err(Error::UnsupportedModFormat {
                id,
                found: project.format_version,
                supported: CURRENT_FORMAT_VERSION,
            });
        }

        let selected = project.variant(variant).ok_or_else(|| Error::InvalidMod {
            id: id.clone(),
            reason: format!("unknown variant '{}'", variant),
        })?;
        let base = project
            .variant(DEFAULT_VARIANT)
            .unwrap_or_else(ModVariant::default_variant);
        let layers: Vec<&ModVariant> = if selected.is_default() {
            vec![&base]
        } else {
            vec![&base, &selected]
        };

        let mut added: BTreeMap<PathKey, SharedResource> = BTreeMap::new();
        let mut removed: BTreeMap<PathKey, ModFilePath> = BTreeMap::new();
        let mut patches: BTreeMap<PathKey, (ModFilePath, Vec<FilePatch>)> = BTreeMap::new();

        // A later layer overrides what earlier layers said about the same path:
        // adding or patching it cancels a removal, removing it cancels adds and patches.
        for layer in &layers {
            let mut layer_added = BTreeMap::new();
            for (path, source) in scan_variant_dir(root, &project, &layer.name)? {
                let resource: SharedResource = Arc::new(DiskResource::new(path.clone(), source));
                layer_added.insert(path.key(), resource);
            }
            let mut layer_removed = BTreeMap::new();
            for removed_file in &layer.removed_files {
                let path = tag_path(&project, removed_file);
                layer_removed.insert(path.key(), path);
            }
            let mut layer_patches = BTreeMap::new();
            for declaration in &layer.patches {
                if declaration.patches.is_empty() {
                    continue;
                }
                let path = tag_path(&project, &declaration.path);
                layer_patches.insert(path.key(), (path, declaration.patches.clone()));
            }

            for key in layer_added.keys().chain(layer_patches.keys()) {
                removed.remove(key);
            }
            for key in layer_removed.keys() {
                added.remove(key);
                patches.remove(key);
            }
            added.extend(layer_added);
            removed.extend(layer_removed);
            patches.extend(layer_patches);
        }

        tracing::debug!(
            "Loaded mod {} ({}) variant={} added={} removed={} patched={}",
            id,
            project.name,
            selected.name,
            added.len(),
            removed.len(),
            patches.len()
        );

        Ok(Self {
            id,
            root: root.to_path_buf(),
            variant: selected.name,
            project,
            added_files: added.into_values().collect(),
            removed_files: removed.into_values().collect(),
            patches: patches.into_values().collect(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn project(&self) -> &ModProject {
        &self.project
    }

    /// Files the mod writes, sorted by path.
    pub fn added_files(&self) -> &[SharedResource] {
        &self.added_files
    }

    /// Paths the mod deletes.
    pub fn removed_files(&self) -> &[ModFilePath] {
        &self.removed_files
    }

    /// Patch lists per path, in declaration order within each path.
    pub fn patches(&self) -> &[(ModFilePath, Vec<FilePatch>)] {
        &self.patches
    }
}

/// Read the package metadata, preferring `mod.config.json` over `mod.config.toml`.
pub fn load_project(id: &str, root: &Utf8Path) -> Result<ModProject> {
    let invalid = |reason: String| Error::InvalidMod {
        id: id.to_string(),
        reason,
    };

    let json_path = root.join("mod.config.json");
    if json_path.as_std_path().exists() {
        let contents = std::fs::read_to_string(json_path.as_std_path())
            .map_err(|e| invalid(format!("failed to read {}: {}", json_path, e)))?;
        return serde_json::from_str(&contents)
            .map_err(|e| invalid(format!("failed to parse {}: {}", json_path, e)));
    }

    let toml_path = root.join("mod.config.toml");
    if toml_path.as_std_path().exists() {
        let contents = std::fs::read_to_string(toml_path.as_std_path())
            .map_err(|e| invalid(format!("failed to read {}: {}", toml_path, e)))?;
        return toml::from_str(&contents)
            .map_err(|e| invalid(format!("failed to parse {}: {}", toml_path, e)));
    }

    Err(invalid(format!("no mod.config.json or mod.config.toml in {}", root)))
}

/// Map a package-relative path onto an archive region, or the installation root.
fn tag_path(project: &ModProject, relative: &str) -> ModFilePath {
    match project.locate(relative) {
        Some((region, rest)) => ModFilePath::in_archive(&region.path, &region.codec, rest),
        None => ModFilePath::physical(relative.replace('\\', "/")),
    }
}

/// List every file under `content/<variant>/`, tagged and paired with its source path.
fn scan_variant_dir(
    root: &Utf8Path,
    project: &ModProject,
    variant: &str,
) -> Result<Vec<(ModFilePath, Utf8PathBuf)>> {
    let dir = root.join(CONTENT_DIR).join(variant);
    if !dir.as_std_path().is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir.as_std_path()).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let source = Utf8PathBuf::from_path_buf(entry.path().to_path_buf())
            .map_err(|p| Error::Other(format!("non UTF-8 path in mod: {}", p.display())))?;
        let relative = source
            .strip_prefix(&dir)
            .map_err(|_| Error::Other(format!("{} is not under {}", source, dir)))?;
        let relative = relative.components().map(|c| c.as_str()).collect::<Vec<_>>().join("/");

        files.push((tag_path(project, &relative), source));
    }
    Ok(files)
}

/// Result of [`load_enabled_mods`].
#[derive(Debug, Default)]
pub struct LoadedMods {
    /// Enabled mods in priority order, highest priority first.
    pub mods: Vec<Mod>,
    /// Enabled mods that could not be loaded, with the reason.
    pub skipped: Vec<(String, Error)>,
}

/// Load every enabled mod of the library in priority order.
///
/// Mods whose metadata is invalid or too new are skipped with a warning; any
/// other error aborts.
pub fn load_enabled_mods(library: &dyn ModLibrary) -> Result<LoadedMods> {
    let manifest = library.read_mod_manifest()?;
    let mut loaded = LoadedMods::default();

    for entry in manifest.mods.iter().filter(|m| m.enabled) {
        match library.read_installed_mod(&entry.id) {
            Ok(m) => loaded.mods.push(m),
            Err(e @ (Error::InvalidMod { .. } | Error::UnsupportedModFormat { .. })) => {
                tracing::warn!("Skipping mod {}: {}", entry.id, e);
                loaded.skipped.push((entry.id.clone(), e));
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        "Loaded {} enabled mod(s), skipped {}",
        loaded.mods.len(),
        loaded.skipped.len()
    );
    Ok(loaded)
}
