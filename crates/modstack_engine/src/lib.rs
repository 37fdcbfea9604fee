//! Mod stack application engine.
//!
//! This crate applies an ordered list of mods to a game installation and keeps
//! enough history to undo it later. It supports:
//!
//! - **Physical files**: add, replace and delete files under the installation root
//! - **Archives**: rewrite entries inside archive files (ZIP built in, other
//!   formats through [`ArchiveCodec`])
//! - **Patches**: byte-level edits layered on top of whichever content wins a path
//! - **Priorities**: earlier mods in the list win over later ones
//! - **Reverts**: every apply first undoes the previous one, so applying an empty
//!   list restores the baseline
//! - **Crash safety**: history is checkpointed after every location and rolled
//!   forward on the next run
//!
//! # Example
//!
//! ```no_run
//! use modstack_engine::{FsModLibrary, ModEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let library = FsModLibrary::new("/games/example", "/games/example-mods");
//!
//! let mut engine = ModEngine::default().with_progress(|progress| {
//!     println!("Stage: {:?}, Progress: {}/{}",
//!         progress.stage, progress.current, progress.total);
//! });
//!
//! let outcome = engine.apply_library(&library)?;
//! println!("success={} repacked={}", outcome.success, outcome.repacked_archives.len());
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod engine;
pub mod error;
pub mod history;
pub mod library;
pub mod location;
pub mod mod_package;
pub mod path;
pub mod record;
pub mod resource;
pub mod utils;

// Re-export main types
pub use archive::{ArchiveCodec, ArchiveReader, ArchiveRegistry, ZipCodec};
pub use engine::{ApplyOutcome, EngineProgress, EngineStage, LocationFailure, ModEngine};
pub use error::{Error, Result};
pub use history::{HistoryBuilder, LibraryFileHistory};
pub use library::{FsModLibrary, ModLibrary, ModManifest, ModManifestEntry};
pub use location::LocationChangeSet;
pub use mod_package::{load_enabled_mods, LoadedMods, Mod};
pub use path::ModFilePath;
pub use record::{BaselineKind, FileChangeRecord, HistoryEntry, RecordOp, RecordSource};
pub use resource::{DiskResource, HistoryResource, MemoryResource, ModFileResource, SharedResource};
