//! Byte sources for file changes.
//!
//! A [`ModFileResource`] is anything that can stream the bytes of one logical file.
//! The engine never cares where bytes come from; it only asks history-backed
//! resources for their backing file so the history builder can move them instead
//! of copying.

use crate::error::Result;
use crate::path::ModFilePath;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

/// Shared handle to a resource. Records, history entries and the history builder
/// may all hold the same resource.
pub type SharedResource = Arc<dyn ModFileResource>;

/// Something that can stream its bytes out, tagged with the path it represents.
pub trait ModFileResource: Send + Sync + fmt::Debug {
    /// The logical file this resource provides content for.
    fn path(&self) -> &ModFilePath;

    /// Open a fresh reader over the full content.
    fn open(&self) -> Result<Box<dyn Read + '_>>;

    /// Read the full content into memory.
    fn read_all(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.open()?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// The file inside the history backup store holding this content, if any.
    fn history_backing(&self) -> Option<&Utf8Path> {
        None
    }
}

/// A physical file on disk, typically part of an installed mod package.
#[derive(Debug, Clone)]
pub struct DiskResource {
    path: ModFilePath,
    source: Utf8PathBuf,
}

impl DiskResource {
    pub fn new(path: ModFilePath, source: Utf8PathBuf) -> Self {
        Self { path, source }
    }

    pub fn source(&self) -> &Utf8Path {
        &self.source
    }
}

impl ModFileResource for DiskResource {
    fn path(&self) -> &ModFilePath {
        &self.path
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(std::fs::File::open(self.source.as_std_path())?))
    }
}

/// Bytes held in memory, used for original content captured during an apply.
#[derive(Clone)]
pub struct MemoryResource {
    path: ModFilePath,
    bytes: Arc<[u8]>,
}

impl MemoryResource {
    pub fn new(path: ModFilePath, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            path,
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for MemoryResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryResource")
            .field("path", &self.path)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ModFileResource for MemoryResource {
    fn path(&self) -> &ModFilePath {
        &self.path
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(Cursor::new(&self.bytes[..])))
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }
}

/// Original bytes already stored in the history backup store.
#[derive(Debug, Clone)]
pub struct HistoryResource {
    path: ModFilePath,
    backup: Utf8PathBuf,
}

impl HistoryResource {
    pub fn new(path: ModFilePath, backup: Utf8PathBuf) -> Self {
        Self { path, backup }
    }
}

impl ModFileResource for HistoryResource {
    fn path(&self) -> &ModFilePath {
        &self.path
    }

    fn open(&self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(std::fs::File::open(self.backup.as_std_path())?))
    }

    fn history_backing(&self) -> Option<&Utf8Path> {
        Some(&self.backup)
    }
}
