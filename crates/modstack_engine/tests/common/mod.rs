//! Shared fixtures for engine integration tests.

#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use modstack_engine::{ApplyOutcome, FsModLibrary, ModEngine};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Route engine logs through the test harness. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("modstack_engine=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A temporary installation plus library storage.
pub struct TestEnv {
    _dir: TempDir,
    pub base: Utf8PathBuf,
    pub game: Utf8PathBuf,
    pub library: FsModLibrary,
}

impl TestEnv {
    pub fn new() -> Self {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let game = base.join("game");
        std::fs::create_dir_all(&game).unwrap();
        let library = FsModLibrary::new(game.clone(), base.join("storage"));
        Self {
            _dir: dir,
            base,
            game,
            library,
        }
    }

    pub fn write_game(&self, rel: &str, bytes: &[u8]) {
        let path = self.game.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    pub fn read_game(&self, rel: &str) -> Option<Vec<u8>> {
        std::fs::read(self.game.join(rel)).ok()
    }

    /// Install a mod package. `extra` is spliced into `mod.config.json` after the
    /// required fields, e.g. `"archives": [...]`.
    ///
    /// Mods installed later take priority over mods installed earlier.
    pub fn install(&self, name: &str, extra: &str, files: &[(&str, &[u8])]) -> String {
        let source = self.base.join("packages").join(name);
        std::fs::create_dir_all(&source).unwrap();

        let extra = if extra.is_empty() {
            String::new()
        } else {
            format!(", {extra}")
        };
        std::fs::write(
            source.join("mod.config.json"),
            format!(
                r#"{{ "name": "{name}", "display_name": "{name}", "version": "1.0.0"{extra} }}"#
            ),
        )
        .unwrap();

        for (rel, bytes) in files {
            let path = source.join("content").join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, bytes).unwrap();
        }

        self.library
            .install_mod_from_dir(&source, "default")
            .unwrap()
            .id
    }

    pub fn apply(&self) -> ApplyOutcome {
        self.apply_with(ModEngine::default())
    }

    pub fn apply_with(&self, mut engine: ModEngine) -> ApplyOutcome {
        engine.apply_library(&self.library).unwrap()
    }

    /// Every file under the installation root with its bytes.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        walkdir::WalkDir::new(self.game.as_std_path())
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e
                    .path()
                    .strip_prefix(self.game.as_std_path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/");
                (rel, std::fs::read(e.path()).unwrap())
            })
            .collect()
    }

    /// Every directory under the installation root.
    pub fn directories(&self) -> Vec<String> {
        walkdir::WalkDir::new(self.game.as_std_path())
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().is_dir())
            .map(|e| {
                e.path()
                    .strip_prefix(self.game.as_std_path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    pub fn backup_of(&self, path: &modstack_engine::ModFilePath) -> Vec<u8> {
        use modstack_engine::ModLibrary;
        self.library
            .file_history_resource(path)
            .unwrap()
            .read_all()
            .unwrap()
    }
}

pub fn build_zip(path: &Utf8Path, entries: &[(&str, &[u8], zip::CompressionMethod)]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    for (name, bytes, method) in entries {
        let options = zip::write::SimpleFileOptions::default().compression_method(*method);
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}

/// Name, decoded bytes, compression method and CRC of every entry.
pub fn zip_entries(path: &Utf8Path) -> Vec<(String, Vec<u8>, zip::CompressionMethod, u32)> {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut file = archive.by_index(i).unwrap();
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes).unwrap();
            (file.name().to_string(), bytes, file.compression(), file.crc32())
        })
        .collect()
}

/// Raw (still compressed) bytes of a named entry.
pub fn zip_raw_entry(path: &Utf8Path, name: &str) -> Vec<u8> {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let index = archive.index_for_name(name).unwrap();
    let mut file = archive.by_index_raw(index).unwrap();
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).unwrap();
    bytes
}
