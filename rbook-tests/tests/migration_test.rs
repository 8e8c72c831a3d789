/// Legacy migration integration tests

use bytes::Bytes;
use rbook_core::migration::{is_migration_complete, MIGRATION_FLAG_KEY};
use rbook_core::{
    migrate_legacy, open_store, FlatFileStore, MigrationOutcome, SqliteStore, StorageAdapter,
    StorageKind, StoreConfig,
};
use tempfile::TempDir;

fn seed_legacy(path: &std::path::Path, keys: usize) {
    let legacy = FlatFileStore::open(path, 400).unwrap();
    let mut pairs: Vec<(String, Bytes)> = (0..keys)
        .map(|i| (format!("setting_{}", i), Bytes::from(format!("{{\"v\":{}}}", i))))
        .collect();
    pairs.push(("cached_rosters".to_string(), Bytes::from(vec![b'r'; 1 << 20])));
    pairs.push(("offline_attendance_queue".to_string(), Bytes::from_static(b"[]")));
    legacy.multi_set(pairs).unwrap();
}

#[test]
fn test_migrates_from_disk_snapshot() {
    let dir = TempDir::new().unwrap();
    let legacy_path = dir.path().join("legacy.kv");
    seed_legacy(&legacy_path, 900);

    let legacy = FlatFileStore::open(&legacy_path, 400).unwrap();
    let config = StoreConfig::at_path(dir.path().join("rollbook.db"));
    let target = SqliteStore::open(&config).unwrap();

    let outcome = migrate_legacy(&legacy, &target, config.batch_chunk_size).unwrap();
    assert_eq!(outcome, MigrationOutcome::Migrated { copied: 900, skipped: 2 });

    // 900 settings plus the completion flag
    assert_eq!(target.get_all_keys().unwrap().len(), 901);
    assert!(target.get("cached_rosters").unwrap().is_none());
    assert_eq!(
        target.get("setting_899").unwrap(),
        Some(Bytes::from_static(b"{\"v\":899}"))
    );
}

#[test]
fn test_flag_survives_restart() {
    let dir = TempDir::new().unwrap();
    let legacy_path = dir.path().join("legacy.kv");
    seed_legacy(&legacy_path, 10);
    let config = StoreConfig::at_path(dir.path().join("rollbook.db"));

    {
        let legacy = FlatFileStore::open(&legacy_path, 400).unwrap();
        let target = SqliteStore::open(&config).unwrap();
        migrate_legacy(&legacy, &target, 400).unwrap();
    }

    let legacy = FlatFileStore::open(&legacy_path, 400).unwrap();
    let target = SqliteStore::open(&config).unwrap();
    assert!(is_migration_complete(&target).unwrap());
    assert!(target.get(MIGRATION_FLAG_KEY).unwrap().is_some());
    assert_eq!(
        migrate_legacy(&legacy, &target, 400).unwrap(),
        MigrationOutcome::AlreadyComplete
    );
}

#[test]
fn test_backends_interchangeable() {
    let dir = TempDir::new().unwrap();
    for (kind, file) in [(StorageKind::Flat, "flat.kv"), (StorageKind::Sqlite, "store.db")] {
        let config = StoreConfig::at_path(dir.path().join(file));
        let store = open_store(&config, kind).unwrap();

        store
            .multi_set(vec![
                ("a".to_string(), Bytes::from_static(b"1")),
                ("b".to_string(), Bytes::from_static(b"2")),
            ])
            .unwrap();
        store.multi_remove(&["a".to_string()]).unwrap();

        let got = store.multi_get(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(got[0], ("a".to_string(), None));
        assert_eq!(got[1], ("b".to_string(), Some(Bytes::from_static(b"2"))));
    }
}
