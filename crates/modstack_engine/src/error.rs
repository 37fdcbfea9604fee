//! Error types for mod application.
//!
//! All fallible functions in this crate return [`Result<T>`], which uses [`Error`]
//! as the error type. External error types (`std::io::Error`, `serde_json::Error`,
//! ZIP errors) are automatically converted via `From` impls.
//!
//! Not every variant aborts an apply run: [`Error::MissingArchiveCodec`] and
//! [`Error::PathTraversal`] are downgraded to warnings by the engine, and
//! [`Error::LocationApply`] only fails the location it occurred in. Only
//! [`Error::ContractViolation`] always propagates out of
//! [`ModEngine::apply`](crate::ModEngine::apply).

use camino::Utf8PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading mods or applying a mod stack.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem I/O failed (reading mod files, writing the installation, etc.).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse or serialize JSON (history, manifest, checkpoints).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from the `zip` crate while decoding or writing an archive.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A byte patch could not be applied.
    #[error("Patch error on '{path}': {source}")]
    Patch {
        path: String,
        #[source]
        source: modstack_project::PatchError,
    },

    /// A mod's metadata file is missing or malformed.
    #[error("Invalid mod '{id}': {reason}")]
    InvalidMod { id: String, reason: String },

    /// A mod declares a metadata format newer than this engine understands.
    #[error("Unsupported mod format in '{id}': version {found} (supported: {supported})")]
    UnsupportedModFormat { id: String, found: u32, supported: u32 },

    /// No archive codec is registered for a location's identifier.
    #[error("No archive codec registered for '{location_id}' (location '{location}')")]
    MissingArchiveCodec {
        location: String,
        location_id: String,
    },

    /// A resolved path escapes the root it must stay under.
    #[error("Path '{path}' escapes root '{root}'")]
    PathTraversal { path: String, root: Utf8PathBuf },

    /// Applying the records of one location failed.
    #[error("Failed to apply location '{location}': {source}")]
    LocationApply {
        location: String,
        #[source]
        source: Box<Error>,
    },

    /// The engine was asked to do something that indicates a merge-order or caller bug.
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// The requested archive does not exist in the installation.
    #[error("Archive not found: {0}")]
    ArchiveNotFound(Utf8PathBuf),

    /// A mod id is not present in the library manifest.
    #[error("Mod not found: {0}")]
    ModNotFound(String),

    /// The library storage is inconsistent (bad manifest, invalid reorder, ...).
    #[error("Invalid library: {0}")]
    InvalidLibrary(String),

    /// The run was stopped through the stop flag.
    #[error("Stopped by request")]
    Stopped,

    /// Catch-all for errors from collaborators and other sources.
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn location(location: &str, source: Error) -> Self {
        Error::LocationApply {
            location: location.to_string(),
            source: Box::new(source),
        }
    }

    /// Whether this error must abort the whole run rather than a single location.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::ContractViolation(_) => true,
            Error::LocationApply { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}
