use std::sync::Arc;

use tempfile::{Builder, TempDir};

use glaive::document::Document;
use glaive::index::file_names;
use glaive::index::{
    BackgroundMerger, CommitState, IndexManager, IndexManagerConfig, Indexer, IndexerOptions,
    Snapshot,
};
use glaive::search::IndexSearcher;
use glaive::storage::lock::Lock;
use glaive::storage::{Folder, FolderFactory};

fn fs_folder(prefix: &str) -> (TempDir, Arc<dyn Folder>) {
    let dir = Builder::new().prefix(prefix).tempdir().unwrap();
    let folder = FolderFactory::open_fs(dir.path()).unwrap();
    (dir, folder)
}

fn doc(title: &str, content: &str) -> Document {
    Document::builder()
        .add_text("title", title)
        .add_text("content", content)
        .build()
}

fn index_docs(folder: &Arc<dyn Folder>, docs: &[Document]) {
    let options = IndexerOptions {
        create: true,
        ..Default::default()
    };
    let mut indexer = Indexer::open(Arc::clone(folder), options).unwrap();
    for d in docs {
        indexer.add_doc(d).unwrap();
    }
    indexer.commit().unwrap();
}

/// Builds an index of three segments holding 20, 2 and 2 documents.
fn three_segment_index(prefix: &str) -> (TempDir, Arc<dyn Folder>) {
    let (dir, folder) = fs_folder(prefix);
    let big: Vec<Document> = (0..20)
        .map(|i| doc(&format!("big{i}"), &format!("common big{i}")))
        .collect();
    index_docs(&folder, &big);
    index_docs(&folder, &[doc("s1", "common small"), doc("s2", "common small")]);
    index_docs(&folder, &[doc("s3", "common small"), doc("s4", "common small")]);
    (dir, folder)
}

fn sorted_segments(folder: &Arc<dyn Folder>) -> Vec<String> {
    let snapshot = Snapshot::open(folder.as_ref(), None).unwrap();
    let mut names: Vec<String> = snapshot
        .list()
        .iter()
        .filter(|e| file_names::segment_number(e).is_some())
        .cloned()
        .collect();
    names.sort();
    names
}

#[test]
fn test_optimizing_merge_consolidates_segments() {
    let (_dir, folder) = three_segment_index("test_bg_optimize");
    let manager = IndexManager::new(Arc::clone(&folder));

    let mut merger = BackgroundMerger::open(Arc::clone(&folder), IndexManagerConfig::default())
        .unwrap();
    assert_eq!(merger.cutoff(), 4);
    assert_eq!(manager.read_merge_data().unwrap().unwrap().cutoff, 4);
    // Indexers may open while the merge runs.
    assert!(!manager.make_write_lock().is_locked().unwrap());
    assert!(manager.make_merge_lock().is_locked().unwrap());

    merger.optimize();
    merger.commit().unwrap();
    assert_eq!(merger.state(), CommitState::Idle);
    assert_eq!(
        merger.merged_segments(),
        ["segment_1", "segment_2", "segment_3"]
    );

    assert_eq!(sorted_segments(&folder), ["segment_4"]);
    assert!(manager.read_merge_data().unwrap().is_none());
    assert!(!manager.make_merge_lock().is_locked().unwrap());
    assert!(!folder.exists("segment_1"));

    let searcher = IndexSearcher::open(folder).unwrap();
    assert_eq!(searcher.doc_count(), 24);
    assert_eq!(searcher.doc_freq("content", "common"), 24);
}

#[test]
fn test_merge_carries_concurrent_changes_forward() {
    let (_dir, folder) = three_segment_index("test_bg_carry");

    let mut merger = BackgroundMerger::open(Arc::clone(&folder), IndexManagerConfig::default())
        .unwrap();
    merger.optimize();
    assert_eq!(merger.cutoff(), 4);

    // An indexer commits while the merge is underway.
    let mut indexer = Indexer::open(Arc::clone(&folder), IndexerOptions::default()).unwrap();
    assert_eq!(indexer.segment().number(), 5);
    assert_eq!(indexer.delete_by_term("title", "big0").unwrap(), 1);
    indexer.add_doc(&doc("late", "common late")).unwrap();
    indexer.commit().unwrap();

    // Segments being merged are left alone by the indexer.
    assert_eq!(
        sorted_segments(&folder),
        ["segment_1", "segment_2", "segment_3", "segment_5"]
    );

    merger.commit().unwrap();
    assert_eq!(
        sorted_segments(&folder),
        ["segment_4", "segment_5", "segment_6"]
    );
    assert!(!folder.exists("segment_2"));

    let searcher = IndexSearcher::open(Arc::clone(&folder)).unwrap();
    assert_eq!(searcher.doc_count(), 24);
    assert!(searcher.term_docs("title", "big0").is_empty());
    assert_eq!(searcher.doc_freq("title", "big1"), 1);
    assert_eq!(searcher.doc_freq("content", "late"), 1);
    assert_eq!(searcher.doc_freq("content", "common"), 24);
}

#[test]
fn test_single_clean_segment_is_left_alone() {
    let (_dir, folder) = fs_folder("test_bg_single");
    index_docs(&folder, &[doc("a", "alpha"), doc("b", "beta")]);

    let mut merger = BackgroundMerger::open(Arc::clone(&folder), IndexManagerConfig::default())
        .unwrap();
    merger.optimize();
    merger.commit().unwrap();

    assert!(merger.merged_segments().is_empty());
    assert_eq!(
        file_names::latest_snapshot(folder.as_ref()).unwrap(),
        Some("snapshot_1.json".to_string())
    );
    let manager = IndexManager::new(folder);
    assert!(manager.read_merge_data().unwrap().is_none());
}

#[test]
fn test_aborted_merge_leaves_index_usable() {
    let (_dir, folder) = three_segment_index("test_bg_abort");

    let mut merger = BackgroundMerger::open(Arc::clone(&folder), IndexManagerConfig::default())
        .unwrap();
    merger.abort().unwrap();
    assert_eq!(merger.state(), CommitState::Aborted);

    let manager = IndexManager::new(Arc::clone(&folder));
    assert!(manager.read_merge_data().unwrap().is_none());

    let mut indexer = Indexer::open(Arc::clone(&folder), IndexerOptions::default()).unwrap();
    indexer.optimize();
    indexer.commit().unwrap();
    assert_eq!(sorted_segments(&folder), ["segment_4"]);
}
