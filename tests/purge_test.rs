use std::sync::Arc;

use tempfile::{Builder, TempDir};

use glaive::document::Document;
use glaive::index::{FilePurger, IndexManager, Indexer, IndexerOptions};
use glaive::search::IndexSearcher;
use glaive::storage::lock::Lock;
use glaive::storage::{Folder, FolderFactory};

fn fs_folder(prefix: &str) -> (TempDir, Arc<dyn Folder>) {
    let dir = Builder::new().prefix(prefix).tempdir().unwrap();
    let folder = FolderFactory::open_fs(dir.path()).unwrap();
    (dir, folder)
}

fn doc(text: &str) -> Document {
    Document::builder().add_text("content", text).build()
}

fn commit(folder: &Arc<dyn Folder>, docs: &[&str], optimize: bool) {
    let options = IndexerOptions {
        create: true,
        ..Default::default()
    };
    let mut indexer = Indexer::open(Arc::clone(folder), options).unwrap();
    for text in docs {
        indexer.add_doc(&doc(text)).unwrap();
    }
    if optimize {
        indexer.optimize();
    }
    indexer.commit().unwrap();
}

#[test]
fn test_open_searcher_pins_its_files() {
    let (_dir, folder) = fs_folder("test_purge_pin");
    commit(&folder, &["alpha", "beta"], false);

    let mut searcher = IndexSearcher::open(Arc::clone(&folder)).unwrap();

    // Replaces segment_1 with segment_2.
    commit(&folder, &["gamma"], true);
    assert!(folder.exists("snapshot_1.json"));
    assert!(folder.exists("segment_1"));
    assert_eq!(searcher.doc_count(), 2);
    assert_eq!(searcher.term_docs("content", "beta"), [1]);

    searcher.close().unwrap();
    commit(&folder, &["delta"], false);
    assert!(!folder.exists("snapshot_1.json"));
    assert!(!folder.exists("snapshot_2.json"));
    assert!(!folder.exists("segment_1"));
    assert!(folder.exists("segment_2"));

    let searcher = IndexSearcher::open(folder).unwrap();
    assert_eq!(searcher.doc_count(), 4);
}

#[test]
fn test_purge_removes_debris_of_failed_writers() {
    let (_dir, folder) = fs_folder("test_purge_debris");
    commit(&folder, &["alpha"], false);

    // An indexer that died before publishing.
    folder.write_file("segment_7/segmeta.json", b"{}").unwrap();
    folder.write_file("snapshot_2.json.temp", b"{}").unwrap();

    let manager = IndexManager::new(Arc::clone(&folder));
    let mut write_lock = manager.make_write_lock();
    write_lock.obtain().unwrap();
    let report = FilePurger::new(&manager).purge().unwrap();
    write_lock.release().unwrap();

    assert!(!report.skipped);
    assert_eq!(report.entries, ["segment_7", "snapshot_2.json.temp"]);
    assert!(!folder.exists("segment_7"));
    assert!(!folder.exists("snapshot_2.json.temp"));
    assert!(folder.exists("segment_1"));
    assert!(folder.exists("snapshot_1.json"));
}

#[test]
fn test_abandoned_merge_is_cleaned_up() {
    let (_dir, folder) = fs_folder("test_purge_dead_merge");
    commit(&folder, &["alpha"], false);

    let manager = IndexManager::new(Arc::clone(&folder));
    manager.write_merge_data(5).unwrap();
    folder.write_file("segment_5/segmeta.json", b"{}").unwrap();

    commit(&folder, &["beta"], false);
    assert!(manager.read_merge_data().unwrap().is_none());
    assert!(!folder.exists("segment_5"));

    let searcher = IndexSearcher::with_manager(&manager).unwrap();
    assert_eq!(searcher.doc_count(), 2);
}
