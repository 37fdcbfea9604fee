//! Path normalization, containment checks and small filesystem helpers.
//!
//! These functions bridge the gap between how mods declare paths (any case, any
//! separator) and how the engine keys, resolves and persists them.

use crate::error::{Error, Result};
use crate::path::PathKey;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use xxhash_rust::xxh3::xxh3_64;

/// Normalize a relative path for keying.
///
/// Lower-cases the path, treats `\` and `/` as the same separator, and drops
/// empty and `.` segments. `..` segments are kept so containment checks still
/// see them.
///
/// - `Data\Foo.TXT` -> `data/foo.txt`
/// - `/data//./foo.txt/` -> `data/foo.txt`
pub fn normalize_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| s.to_lowercase())
        .collect::<Vec<_>>()
        .join("/")
}

/// Name of the backup file holding the original bytes for `key`.
///
/// Backups live flat inside the history store and are named by the xxHash3 of the
/// normalized key, so a path always maps to the same backup name regardless of
/// where it is listed in the history.
pub fn backup_file_name(key: &PathKey) -> String {
    let hash = xxh3_64(format!("{}|{}", key.location(), key.file()).as_bytes());
    format!("{:016x}.bak", hash)
}

/// Resolve `relative` against `root`, refusing anything that would land outside it.
///
/// Resolution is lexical: `..` segments pop previously pushed segments and must
/// never pop past `root`. Absolute paths and drive-prefixed paths are rejected.
pub fn resolve_under_root(root: &Utf8Path, relative: &str) -> Result<Utf8PathBuf> {
    let segments = contained_segments(relative).ok_or_else(|| Error::PathTraversal {
        path: relative.to_string(),
        root: root.to_path_buf(),
    })?;

    let mut resolved = root.to_path_buf();
    for segment in segments {
        resolved.push(segment);
    }
    Ok(resolved)
}

/// Resolve a new entry name inside `archive` the same way, joined with `/`.
pub fn resolve_entry_name(archive: &Utf8Path, name: &str) -> Result<String> {
    contained_segments(name)
        .map(|segments| segments.join("/"))
        .ok_or_else(|| Error::PathTraversal {
            path: name.to_string(),
            root: archive.to_path_buf(),
        })
}

fn contained_segments(relative: &str) -> Option<Vec<&str>> {
    if relative.starts_with(['/', '\\']) || Utf8Path::new(relative).has_root() {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in relative.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s if s.contains(':') => return None,
            s => segments.push(s),
        }
    }

    (!segments.is_empty()).then_some(segments)
}

/// Remove `dir` and its ancestors while they are empty, stopping at `root`.
///
/// `root` itself is never removed. Failures are logged and otherwise ignored:
/// a directory that can't be removed simply stays.
pub fn prune_empty_dirs(dir: &Utf8Path, root: &Utf8Path) {
    let mut current = Some(dir);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }

        let is_empty = match std::fs::read_dir(dir.as_std_path()) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => false,
        };
        if !is_empty {
            break;
        }

        if let Err(e) = std::fs::remove_dir(dir.as_std_path()) {
            tracing::debug!("Could not prune empty directory {}: {}", dir, e);
            break;
        }
        tracing::debug!("Pruned empty directory {}", dir);
        current = dir.parent();
    }
}

/// Read a JSON document.
///
/// Returns `Ok(None)` if the file doesn't exist and `Err` if it exists but can't be parsed.
pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>> {
    if !path.as_std_path().exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path.as_std_path())?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Write a pretty JSON document atomically (temporary file in the same directory, then rename).
pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    std::fs::create_dir_all(parent.as_std_path())?;

    let mut temp = tempfile::NamedTempFile::new_in(parent.as_std_path())?;
    serde_json::to_writer_pretty(&mut temp, value)?;
    temp.flush()?;
    temp.persist(path.as_std_path()).map_err(|e| e.error)?;
    Ok(())
}
