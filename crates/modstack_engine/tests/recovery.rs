//! Rolling an interrupted apply forward.

mod common;

use common::TestEnv;
use modstack_engine::{
    FileChangeRecord, HistoryBuilder, MemoryResource, ModFilePath, ModLibrary, RecordSource,
};
use std::sync::Arc;

/// Leave the library as a crashed apply would: game files already mutated,
/// the checkpoint written, nothing committed.
fn interrupt_apply(env: &TestEnv) {
    let previous = env
        .library
        .read_history()
        .unwrap()
        .unwrap_or_default()
        .load_entries(&env.library)
        .unwrap();
    let staging = env.library.begin_history_staging().unwrap();
    let mut history = HistoryBuilder::new(staging, previous);

    let new_file = ModFilePath::physical("data/new.txt");
    let added = FileChangeRecord::add(
        new_file.clone(),
        Arc::new(MemoryResource::new(new_file, b"N".to_vec())),
        RecordSource::FromMod,
    );
    history.record(&added, false, None).unwrap();
    env.write_game("data/new.txt", b"N");

    let bar = ModFilePath::physical("data/bar.txt");
    let original = env.read_game("data/bar.txt").unwrap();
    let replaced = FileChangeRecord::add(
        bar.clone(),
        Arc::new(MemoryResource::new(bar.clone(), b"X".to_vec())),
        RecordSource::FromMod,
    );
    history
        .record(
            &replaced,
            true,
            Some(Arc::new(MemoryResource::new(bar, original))),
        )
        .unwrap();
    env.write_game("data/bar.txt", b"X");

    history.checkpoint(&env.library).unwrap();
}

#[test]
fn test_interrupted_apply_is_rolled_forward() {
    let env = TestEnv::new();
    env.write_game("data/foo.txt", b"A");
    env.write_game("data/bar.txt", b"C");
    let a = env.install("a", "", &[("default/data/foo.txt", b"B")]);
    assert!(env.apply().success);

    interrupt_apply(&env);

    let recovered = env.library.read_history().unwrap().unwrap();
    assert_eq!(
        recovered.replaced_files,
        vec![
            ModFilePath::physical("data/bar.txt"),
            ModFilePath::physical("data/foo.txt"),
        ]
    );
    assert_eq!(
        recovered.added_files,
        vec![ModFilePath::physical("data/new.txt")]
    );
    assert_eq!(env.backup_of(&ModFilePath::physical("data/bar.txt")), b"C");
    assert_eq!(env.backup_of(&ModFilePath::physical("data/foo.txt")), b"A");

    env.library.uninstall_mod(&a).unwrap();
    let outcome = env.apply();

    assert!(outcome.success);
    assert!(outcome.history.is_empty());
    assert_eq!(env.read_game("data/foo.txt").unwrap(), b"A");
    assert_eq!(env.read_game("data/bar.txt").unwrap(), b"C");
    assert!(env.read_game("data/new.txt").is_none());
}

#[test]
fn test_interrupted_apply_then_reapply_converges() {
    let env = TestEnv::new();
    env.write_game("data/foo.txt", b"A");
    env.write_game("data/bar.txt", b"C");
    env.install("a", "", &[("default/data/foo.txt", b"B")]);
    assert!(env.apply().success);

    interrupt_apply(&env);
    let outcome = env.apply();

    assert!(outcome.success);
    assert_eq!(env.read_game("data/foo.txt").unwrap(), b"B");
    assert_eq!(env.read_game("data/bar.txt").unwrap(), b"C");
    assert!(env.read_game("data/new.txt").is_none());
    assert_eq!(
        outcome.history.replaced_files,
        vec![ModFilePath::physical("data/foo.txt")]
    );
}
