//! Integration tests for minidfs on-disk state

use minidfs::common::Error;
use minidfs::coordinator::{FileRecord, MetadataCatalog, NodeRegistry, PlacementManager};
use minidfs::volume::BlockStore;
use tempfile::TempDir;

fn registry() -> NodeRegistry {
    NodeRegistry::parse("# storage nodes\n10.0.0.1:8001\n\n10.0.0.2:8001\n  10.0.0.3:8001  \n").unwrap()
}

#[tokio::test]
async fn test_volume_persistence() {
    let dir = TempDir::new().unwrap();
    let data_path = dir.path().join("blocks");

    // Write data
    {
        let store = BlockStore::open(&data_path, 1024).unwrap();
        store.store("doc_block_0", b"value1").await.unwrap();
        store.store("doc_backup_block_1", b"value2").await.unwrap();
    }

    // Reopen and verify
    {
        let store = BlockStore::open(&data_path, 1024).unwrap();
        assert_eq!(store.read("doc_block_0").await.unwrap().unwrap(), b"value1");
        assert_eq!(store.read("doc_backup_block_1").await.unwrap().unwrap(), b"value2");
        assert_eq!(store.keys().unwrap().len(), 2);
    }
}

#[tokio::test]
async fn test_block_keys_stay_inside_data_dir() {
    let dir = TempDir::new().unwrap();
    let data_path = dir.path().join("blocks");
    let store = BlockStore::open(&data_path, 1024).unwrap();

    store.store("../escape_block_0", b"x").await.unwrap();
    assert!(!dir.path().join("escape_block_0").exists());
    assert_eq!(store.keys().unwrap(), vec!["../escape_block_0".to_string()]);

    assert!(matches!(store.store("..", b"x").await, Err(Error::InvalidRequest(_))));
}

#[test]
fn test_catalog_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metadata.json");
    let placement = PlacementManager::new(registry());

    {
        let mut catalog = MetadataCatalog::open(&path).unwrap();
        catalog
            .put(FileRecord::new("doc", placement.place(3).unwrap()))
            .unwrap();
        catalog
            .put(FileRecord::new("notes", placement.place(1).unwrap()))
            .unwrap();
        catalog.remove("notes").unwrap();
    }

    let catalog = MetadataCatalog::open(&path).unwrap();
    assert_eq!(catalog.list(), vec!["doc"]);
    let record = catalog.get("doc").unwrap();
    assert_eq!(
        record.primaries(),
        vec!["10.0.0.1:8001", "10.0.0.2:8001", "10.0.0.3:8001"]
    );
    assert_eq!(
        record.backups(),
        vec!["10.0.0.3:8001", "10.0.0.1:8001", "10.0.0.2:8001"]
    );
}

#[test]
fn test_corrupt_catalog_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metadata.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let err = MetadataCatalog::open(&path).unwrap_err();
    assert!(matches!(err, Error::MetadataCorrupted(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_empty_registry_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodeList");
    std::fs::write(&path, "\n# nothing here\n").unwrap();

    let err = NodeRegistry::load(&path).unwrap_err();
    assert!(err.is_fatal());

    let missing = NodeRegistry::load(dir.path().join("absent")).unwrap_err();
    assert!(missing.is_fatal());
}
