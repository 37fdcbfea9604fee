//! Apply and revert behavior inside archive locations.

mod common;

use camino::{Utf8Path, Utf8PathBuf};
use common::{build_zip, zip_entries, zip_raw_entry, TestEnv};
use modstack_engine::{
    ArchiveCodec, ArchiveReader, ArchiveRegistry, EngineProgress, ModEngine, ModFilePath, Result,
    ZipCodec,
};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use zip::CompressionMethod;

const UI_REGION: &str = r#""archives": [{ "path": "data/packs/ui.zip", "codec": "zip" }]"#;

fn ui(file: &str) -> ModFilePath {
    ModFilePath::in_archive("data/packs/ui.zip", "zip", file)
}

fn entry_map(path: &Utf8Path) -> BTreeMap<String, Vec<u8>> {
    zip_entries(path)
        .into_iter()
        .map(|(name, bytes, _, _)| (name, bytes))
        .collect()
}

fn setup_ui_archive(env: &TestEnv) -> Utf8PathBuf {
    let archive = env.game.join("data/packs/ui.zip");
    build_zip(
        &archive,
        &[
            ("icons/a.png", b"aaa-original", CompressionMethod::Deflated),
            ("icons/b.png", b"bbb", CompressionMethod::Stored),
            ("readme.txt", b"hello hello hello", CompressionMethod::Deflated),
        ],
    );
    archive
}

#[test]
fn test_archive_entries_are_replaced_added_and_removed() {
    let env = TestEnv::new();
    let archive = setup_ui_archive(&env);
    let untouched_raw = zip_raw_entry(&archive, "readme.txt");

    env.install(
        "ui",
        &format!(
            r#"{UI_REGION}, "variants": [{{ "name": "default", "removed_files": ["data/packs/ui.zip/icons/b.png"] }}]"#
        ),
        &[
            ("default/data/packs/ui.zip/icons/a.png", b"AAA"),
            ("default/data/packs/ui.zip/icons/new.png", b"NEW"),
        ],
    );

    let outcome = env.apply();
    assert!(outcome.success);
    assert_eq!(outcome.repacked_archives, vec![archive.clone()]);

    let entries = zip_entries(&archive);
    let names: Vec<&str> = entries.iter().map(|e| e.0.as_str()).collect();
    assert_eq!(names, vec!["icons/a.png", "readme.txt", "icons/new.png"]);
    assert_eq!(entries[0].1, b"AAA");
    assert_eq!(entries[0].2, CompressionMethod::Deflated);
    assert_eq!(entries[2].1, b"NEW");

    // Untouched entries are copied byte for byte.
    assert_eq!(zip_raw_entry(&archive, "readme.txt"), untouched_raw);

    assert_eq!(outcome.history.replaced_files, vec![ui("icons/a.png")]);
    assert_eq!(outcome.history.added_files, vec![ui("icons/new.png")]);
    assert_eq!(outcome.history.removed_files, vec![ui("icons/b.png")]);
    assert_eq!(env.backup_of(&ui("icons/a.png")), b"aaa-original");
    assert_eq!(env.backup_of(&ui("icons/b.png")), b"bbb");
}

#[test]
fn test_archive_revert_restores_entries() {
    let env = TestEnv::new();
    let archive = setup_ui_archive(&env);
    let baseline = entry_map(&archive);

    let id = env.install(
        "ui",
        &format!(
            r#"{UI_REGION}, "variants": [{{ "name": "default",
                "removed_files": ["data/packs/ui.zip/icons/b.png"],
                "patches": [{{ "path": "data/packs/ui.zip/readme.txt", "patches": [{{ "kind": "append", "data": "21" }}] }}]
            }}]"#
        ),
        &[("default/data/packs/ui.zip/icons/new.png", b"NEW")],
    );
    assert!(env.apply().success);
    assert_eq!(
        entry_map(&archive).get("readme.txt").unwrap(),
        b"hello hello hello!"
    );

    env.library.set_mod_enabled(&id, false).unwrap();
    let outcome = env.apply();

    assert!(outcome.success);
    assert_eq!(entry_map(&archive), baseline);
    assert!(outcome.history.is_empty());
}

#[test]
fn test_archive_apply_is_idempotent() {
    let env = TestEnv::new();
    let archive = setup_ui_archive(&env);
    env.install(
        "ui",
        UI_REGION,
        &[("default/data/packs/ui.zip/icons/a.png", b"AAA")],
    );

    let first = env.apply();
    let after_first = entry_map(&archive);
    let second = env.apply();

    assert!(first.success && second.success);
    assert_eq!(entry_map(&archive), after_first);
    assert_eq!(first.history, second.history);
    assert_eq!(env.backup_of(&ui("icons/a.png")), b"aaa-original");
}

#[test]
fn test_archive_and_root_paths_do_not_collide() {
    let env = TestEnv::new();
    let archive = setup_ui_archive(&env);
    env.write_game("icons/a.png", b"loose");
    env.install(
        "ui",
        UI_REGION,
        &[("default/data/packs/ui.zip/icons/a.png", b"AAA")],
    );

    assert!(env.apply().success);
    assert_eq!(env.read_game("icons/a.png").unwrap(), b"loose");
    assert_eq!(entry_map(&archive).get("icons/a.png").unwrap(), b"AAA");
}

#[test]
fn test_unknown_codec_drops_location_only() {
    let env = TestEnv::new();
    env.install(
        "mixed",
        r#""archives": [{ "path": "data/blob.pak", "codec": "pak" }]"#,
        &[
            ("default/data/blob.pak/inner.txt", b"inner"),
            ("default/data/loose.txt", b"loose"),
        ],
    );

    let outcome = env.apply();
    assert!(outcome.success);
    assert_eq!(outcome.dropped_locations, vec!["data/blob.pak".to_string()]);
    assert_eq!(env.read_game("data/loose.txt").unwrap(), b"loose");
    assert_eq!(
        outcome.history.added_files,
        vec![ModFilePath::physical("data/loose.txt")]
    );
}

#[test]
fn test_missing_archive_fails_its_location() {
    let env = TestEnv::new();
    env.install(
        "mixed",
        r#""archives": [{ "path": "data/missing.zip", "codec": "zip" }]"#,
        &[
            ("default/data/missing.zip/inner.txt", b"inner"),
            ("default/data/loose.txt", b"loose"),
        ],
    );

    let outcome = env.apply();
    assert!(!outcome.success);
    assert_eq!(outcome.failed_locations.len(), 1);
    assert_eq!(outcome.failed_locations[0].location, "data/missing.zip");
    assert_eq!(env.read_game("data/loose.txt").unwrap(), b"loose");
}

/// Zip codec under another id that records post-repack hook calls.
struct HookedZip {
    calls: Arc<Mutex<Vec<Vec<Utf8PathBuf>>>>,
}

impl ArchiveCodec for HookedZip {
    fn id(&self) -> &str {
        "hooked"
    }

    fn open(&self, path: &Utf8Path) -> Result<Box<dyn ArchiveReader>> {
        ZipCodec.open(path)
    }

    fn repack_progress_length(&self) -> u64 {
        10
    }

    fn on_archives_repacked(
        &self,
        _install_root: &Utf8Path,
        archives: &[Utf8PathBuf],
        progress: &dyn Fn(u64),
        _stop: &AtomicBool,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(archives.to_vec());
        progress(10);
        Ok(())
    }
}

#[test]
fn test_post_repack_hook_runs_once_per_codec() {
    let env = TestEnv::new();
    for name in ["one", "two"] {
        build_zip(
            &env.game.join(format!("data/{name}.zip")),
            &[("a.txt", b"a", CompressionMethod::Deflated)],
        );
    }
    env.install(
        "hooked",
        r#""archives": [
            { "path": "data/one.zip", "codec": "hooked" },
            { "path": "data/two.zip", "codec": "hooked" }
        ]"#,
        &[
            ("default/data/one.zip/a.txt", b"A1"),
            ("default/data/two.zip/a.txt", b"A2"),
        ],
    );

    let calls: Arc<Mutex<Vec<Vec<Utf8PathBuf>>>> = Arc::default();
    let registry = ArchiveRegistry::with_defaults().with_codec(HookedZip {
        calls: calls.clone(),
    });
    let events: Arc<Mutex<Vec<EngineProgress>>> = Arc::default();
    let sink = events.clone();
    let engine = ModEngine::new(registry).with_progress(move |p| sink.lock().unwrap().push(p));

    let outcome = env.apply_with(engine);
    assert!(outcome.success);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let mut archives = calls[0].clone();
    archives.sort();
    assert_eq!(
        archives,
        vec![env.game.join("data/one.zip"), env.game.join("data/two.zip")]
    );

    let events = events.lock().unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.total, 2 * 100 + 10);
    assert_eq!(last.current, last.total);
    assert!(events.windows(2).all(|w| w[0].current <= w[1].current));
}
