//! Byte-level patches declared by mod packages.

use regex::bytes::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single byte-level transform applied to a file's contents.
///
/// Patches run after all file additions and removals have been resolved, in
/// declaration order. Binary payloads are written as hex strings in metadata.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilePatch {
    /// Overwrite `data.len()` bytes starting at `offset`.
    Overwrite {
        offset: u64,
        #[serde(with = "hex")]
        data: Vec<u8>,
    },
    /// Replace every non-overlapping occurrence of `find` with `replace`.
    Replace { find: String, replace: String },
    /// Append bytes to the end of the file.
    Append {
        #[serde(with = "hex")]
        data: Vec<u8>,
    },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PatchError {
    #[error("overwrite of {len} bytes at offset {offset} exceeds file size {size}")]
    OutOfBounds { offset: u64, len: usize, size: usize },

    #[error("replace patch has an empty search pattern")]
    EmptyPattern,

    #[error("replace patch search pattern can't be compiled: {0}")]
    InvalidPattern(String),
}

impl FilePatch {
    /// Apply the patch to `bytes` in place.
    pub fn apply(&self, bytes: &mut Vec<u8>) -> Result<(), PatchError> {
        match self {
            FilePatch::Overwrite { offset, data } => {
                let start = usize::try_from(*offset).unwrap_or(usize::MAX);
                let end = start.checked_add(data.len());
                match end {
                    Some(end) if end <= bytes.len() => {
                        bytes[start..end].copy_from_slice(data);
                        Ok(())
                    }
                    _ => Err(PatchError::OutOfBounds {
                        offset: *offset,
                        len: data.len(),
                        size: bytes.len(),
                    }),
                }
            }
            FilePatch::Replace { find, replace } => {
                if find.is_empty() {
                    return Err(PatchError::EmptyPattern);
                }
                *bytes = replace_all(bytes, find, replace.as_bytes())?;
                Ok(())
            }
            FilePatch::Append { data } => {
                bytes.extend_from_slice(data);
                Ok(())
            }
        }
    }
}

/// Replace every non-overlapping occurrence of `find`, left to right.
fn replace_all(haystack: &[u8], find: &str, replace: &[u8]) -> Result<Vec<u8>, PatchError> {
    let pattern = Regex::new(&regex::escape(find))
        .map_err(|e| PatchError::InvalidPattern(e.to_string()))?;
    Ok(pattern.replace_all(haystack, NoExpand(replace)).into_owned())
}
