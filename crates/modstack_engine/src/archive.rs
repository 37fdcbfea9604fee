//! Archive codecs: decoding archive files into entry lists and writing them back.
//!
//! A location other than the installation root is an archive file. The engine
//! never touches archive formats itself; it goes through an [`ArchiveCodec`]
//! resolved by the location's identifier in an [`ArchiveRegistry`].
//!
//! Reading and writing are split so a location can be rewritten in two passes:
//! decode the full entry list once, replace or drop entries, append new ones, and
//! then hand the final list back to the same reader to produce the new archive.
//! Untouched entries stay [`EntryContent::Original`] and are copied verbatim.

use crate::error::{Error, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Entry attribute holding the compression method a codec should re-encode with.
pub const ATTR_COMPRESSION: &str = "compression";

/// Where an entry's bytes come from when the archive is written.
#[derive(Clone, PartialEq, Eq)]
pub enum EntryContent {
    /// Unchanged entry at this index of the source archive.
    Original { index: usize },
    /// New bytes produced by [`ArchiveReader::encode_entry`].
    Replaced(Vec<u8>),
}

impl fmt::Debug for EntryContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryContent::Original { index } => write!(f, "Original({})", index),
            EntryContent::Replaced(bytes) => write!(f, "Replaced({} bytes)", bytes.len()),
        }
    }
}

/// One entry of a decoded archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Entry name relative to its directory.
    pub name: String,
    pub is_directory: bool,
    pub content: EntryContent,
    /// Codec-specific metadata (compression method and similar).
    pub attributes: BTreeMap<String, String>,
}

/// A group of entries sharing a name prefix.
#[derive(Debug, Clone, Default)]
pub struct ArchiveDirectory {
    pub name: String,
    pub entries: Vec<ArchiveEntry>,
}

/// The full decoded entry list of an archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveContents {
    pub directories: Vec<ArchiveDirectory>,
}

impl ArchiveContents {
    pub fn entry_count(&self) -> usize {
        self.directories.iter().map(|d| d.entries.len()).sum()
    }

    /// Get the directory with `name`, creating it at the end if missing.
    pub fn directory_mut(&mut self, name: &str) -> &mut ArchiveDirectory {
        let index = match self.directories.iter().position(|d| d.name == name) {
            Some(index) => index,
            None => {
                self.directories.push(ArchiveDirectory {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                self.directories.len() - 1
            }
        };
        &mut self.directories[index]
    }
}

/// Statistics from writing an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepackResult {
    /// Number of entries written in total.
    pub entries_written: usize,
    /// Number of entries copied verbatim from the source archive.
    pub entries_copied: usize,
    /// Number of entries encoded from new bytes.
    pub entries_encoded: usize,
}

/// Progress of a codec write: `(entries_done, entries_total)`.
pub type WriteProgress<'a> = &'a dyn Fn(usize, usize);

/// An opened archive.
pub trait ArchiveReader {
    /// Decode the full entry list.
    fn contents(&mut self) -> Result<ArchiveContents>;

    /// Read the decoded bytes of an entry.
    fn read_entry(&mut self, entry: &ArchiveEntry) -> Result<Vec<u8>>;

    /// Create an empty entry for `file_path`, returning the directory it belongs in.
    fn new_entry(&self, file_path: &str) -> (String, ArchiveEntry);

    /// Replace an entry's content with `bytes`, encoded the way its attributes describe.
    fn encode_entry(&self, entry: &mut ArchiveEntry, bytes: Vec<u8>) -> Result<()>;

    /// Write `contents` as a complete archive to `output`.
    ///
    /// Must check `stop` between entries and fail with [`Error::Stopped`] when set.
    fn write(
        &mut self,
        contents: &ArchiveContents,
        output: &mut File,
        progress: WriteProgress<'_>,
        stop: &AtomicBool,
    ) -> Result<RepackResult>;
}

/// An archive format the engine can rewrite.
pub trait ArchiveCodec: Send + Sync {
    /// Identifier matched against `location_id`.
    fn id(&self) -> &str;

    fn open(&self, path: &Utf8Path) -> Result<Box<dyn ArchiveReader>>;

    fn path_separator(&self) -> char {
        '/'
    }

    /// Join path segments with this codec's separator, skipping empty segments.
    fn combine_paths(&self, segments: &[&str]) -> String {
        let separator = self.path_separator().to_string();
        segments
            .iter()
            .flat_map(|s| s.split(['/', '\\']))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(&separator)
    }

    /// Progress units reported by [`on_archives_repacked`](Self::on_archives_repacked).
    fn repack_progress_length(&self) -> u64 {
        0
    }

    /// Called once per run with every archive of this codec that was rewritten.
    ///
    /// `progress` receives the number of units completed so far.
    fn on_archives_repacked(
        &self,
        _install_root: &Utf8Path,
        _archives: &[Utf8PathBuf],
        _progress: &dyn Fn(u64),
        _stop: &AtomicBool,
    ) -> Result<()> {
        Ok(())
    }
}

/// Archive codecs by location identifier.
#[derive(Clone, Default)]
pub struct ArchiveRegistry {
    codecs: HashMap<String, Arc<dyn ArchiveCodec>>,
}

impl ArchiveRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in codec.
    pub fn with_defaults() -> Self {
        Self::new().with_codec(ZipCodec)
    }

    pub fn with_codec(mut self, codec: impl ArchiveCodec + 'static) -> Self {
        self.register(Arc::new(codec));
        self
    }

    /// Register a codec, replacing any codec with the same identifier.
    pub fn register(&mut self, codec: Arc<dyn ArchiveCodec>) {
        self.codecs.insert(codec.id().to_lowercase(), codec);
    }

    pub fn get(&self, location_id: &str) -> Option<Arc<dyn ArchiveCodec>> {
        self.codecs.get(&location_id.to_lowercase()).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

impl fmt::Debug for ArchiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveRegistry")
            .field("codecs", &self.ids())
            .finish()
    }
}

/// ZIP archives (`location_id = "zip"`).
///
/// Every archive is a single directory with an empty name. Unchanged entries are
/// raw-copied without recompression; replaced entries keep their original
/// compression method (stored, deflated, bzip2 or zstd); new entries are deflated.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipCodec;

impl ZipCodec {
    pub const ID: &'static str = "zip";
}

impl ArchiveCodec for ZipCodec {
    fn id(&self) -> &str {
        Self::ID
    }

    fn open(&self, path: &Utf8Path) -> Result<Box<dyn ArchiveReader>> {
        let file = File::open(path.as_std_path())?;
        let archive = ZipArchive::new(BufReader::new(file))?;
        tracing::debug!("Opened zip archive {} entries={}", path, archive.len());
        Ok(Box::new(ZipArchiveReader { archive }))
    }
}

struct ZipArchiveReader {
    archive: ZipArchive<BufReader<File>>,
}

/// Attribute value for an entry's compression method.
///
/// Methods zip can read but not write (lzma, deflate64, ...) are reported as
/// `deflated`, which is what re-encoding such an entry produces. Entries left
/// untouched keep their original method either way.
fn compression_name(method: CompressionMethod) -> &'static str {
    match method {
        CompressionMethod::Stored => "stored",
        CompressionMethod::Bzip2 => "bzip2",
        CompressionMethod::Zstd => "zstd",
        _ => "deflated",
    }
}

fn compression_method(entry: &ArchiveEntry) -> CompressionMethod {
    match entry.attributes.get(ATTR_COMPRESSION).map(String::as_str) {
        Some("stored") => CompressionMethod::Stored,
        Some("bzip2") => CompressionMethod::Bzip2,
        Some("zstd") => CompressionMethod::Zstd,
        _ => CompressionMethod::Deflated,
    }
}

impl ArchiveReader for ZipArchiveReader {
    fn contents(&mut self) -> Result<ArchiveContents> {
        let mut entries = Vec::with_capacity(self.archive.len());
        for index in 0..self.archive.len() {
            let file = self.archive.by_index_raw(index)?;
            let mut attributes = BTreeMap::new();
            attributes.insert(
                ATTR_COMPRESSION.to_string(),
                compression_name(file.compression()).to_string(),
            );
            entries.push(ArchiveEntry {
                name: file.name().to_string(),
                is_directory: file.is_dir(),
                content: EntryContent::Original { index },
                attributes,
            });
        }

        Ok(ArchiveContents {
            directories: vec![ArchiveDirectory {
                name: String::new(),
                entries,
            }],
        })
    }

    fn read_entry(&mut self, entry: &ArchiveEntry) -> Result<Vec<u8>> {
        match &entry.content {
            EntryContent::Original { index } => {
                let mut file = self.archive.by_index(*index)?;
                let mut bytes = Vec::with_capacity(file.size() as usize);
                file.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
            EntryContent::Replaced(bytes) => Ok(bytes.clone()),
        }
    }

    fn new_entry(&self, file_path: &str) -> (String, ArchiveEntry) {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            ATTR_COMPRESSION.to_string(),
            compression_name(CompressionMethod::Deflated).to_string(),
        );
        let entry = ArchiveEntry {
            name: file_path.replace('\\', "/"),
            is_directory: false,
            content: EntryContent::Replaced(Vec::new()),
            attributes,
        };
        (String::new(), entry)
    }

    fn encode_entry(&self, entry: &mut ArchiveEntry, bytes: Vec<u8>) -> Result<()> {
        entry.content = EntryContent::Replaced(bytes);
        Ok(())
    }

    fn write(
        &mut self,
        contents: &ArchiveContents,
        output: &mut File,
        progress: WriteProgress<'_>,
        stop: &AtomicBool,
    ) -> Result<RepackResult> {
        let total = contents.entry_count();
        let mut result = RepackResult::default();
        let mut writer = ZipWriter::new(output);

        for directory in &contents.directories {
            for entry in &directory.entries {
                if stop.load(Ordering::Relaxed) {
                    return Err(Error::Stopped);
                }

                match &entry.content {
                    EntryContent::Original { index } => {
                        let raw = self.archive.by_index_raw(*index)?;
                        writer.raw_copy_file(raw)?;
                        result.entries_copied += 1;
                    }
                    EntryContent::Replaced(bytes) => {
                        let name = ZipCodec.combine_paths(&[&directory.name, &entry.name]);
                        let options = SimpleFileOptions::default()
                            .compression_method(compression_method(entry))
                            .large_file(bytes.len() as u64 >= u32::MAX as u64);
                        if entry.is_directory {
                            writer.add_directory(name, options)?;
                        } else {
                            writer.start_file(name, options)?;
                            writer.write_all(bytes)?;
                        }
                        result.entries_encoded += 1;
                    }
                }

                result.entries_written += 1;
                progress(result.entries_written, total);
            }
        }

        writer.finish()?.flush()?;
        Ok(result)
    }
}
