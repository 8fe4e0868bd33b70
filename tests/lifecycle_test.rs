use std::sync::Arc;

use tempfile::{Builder, TempDir};

use glaive::document::Document;
use glaive::index::data::DataReader;
use glaive::index::file_names;
use glaive::index::{IndexManager, Indexer, IndexerOptions, PolyReader, Snapshot};
use glaive::search::IndexSearcher;
use glaive::storage::{Folder, FolderConfig, FolderFactory, FsFolderConfig};

fn fs_folder(prefix: &str) -> (TempDir, Arc<dyn Folder>) {
    let dir = Builder::new().prefix(prefix).tempdir().unwrap();
    let config = FolderConfig::Fs(FsFolderConfig::new(dir.path()));
    let folder = FolderFactory::create(config).unwrap();
    (dir, folder)
}

fn create_options() -> IndexerOptions {
    IndexerOptions {
        create: true,
        ..Default::default()
    }
}

fn doc(title: &str, content: &str) -> Document {
    Document::builder()
        .add_text("title", title)
        .add_text("content", content)
        .build()
}

fn index_docs(folder: &Arc<dyn Folder>, docs: &[Document]) {
    let mut indexer = Indexer::open(Arc::clone(folder), create_options()).unwrap();
    for d in docs {
        indexer.add_doc(d).unwrap();
    }
    indexer.commit().unwrap();
}

fn segment_names(folder: &Arc<dyn Folder>) -> Vec<String> {
    Snapshot::open(folder.as_ref(), None)
        .unwrap()
        .list()
        .iter()
        .filter(|e| file_names::segment_number(e).is_some())
        .cloned()
        .collect()
}

#[test]
fn test_empty_commit_on_fresh_index() {
    let (_dir, folder) = fs_folder("test_empty_commit");
    Indexer::open(Arc::clone(&folder), create_options())
        .unwrap()
        .commit()
        .unwrap();

    let snapshot = Snapshot::open(folder.as_ref(), None).unwrap();
    assert_eq!(snapshot.path(), Some("snapshot_1.json"));
    assert_eq!(snapshot.num_entries(), 0);

    let searcher = IndexSearcher::open(Arc::clone(&folder)).unwrap();
    assert_eq!(searcher.doc_count(), 0);
    assert!(!folder.exists("segment_1"));
}

#[test]
fn test_delete_by_term_and_by_id() {
    let (_dir, folder) = fs_folder("test_deletes");
    index_docs(
        &folder,
        &[
            doc("a", "alpha"),
            doc("b", "beta"),
            doc("c", "gamma"),
        ],
    );

    let mut indexer = Indexer::open(Arc::clone(&folder), IndexerOptions::default()).unwrap();
    assert_eq!(indexer.delete_by_term("content", "beta").unwrap(), 1);
    assert!(indexer.delete_by_doc_id(0).unwrap());
    assert!(!indexer.delete_by_doc_id(0).unwrap());
    assert!(indexer.delete_by_doc_id(3).is_err());
    indexer.commit().unwrap();

    let searcher = IndexSearcher::open(Arc::clone(&folder)).unwrap();
    assert_eq!(searcher.doc_count(), 1);
    let live: Vec<&str> = (0..searcher.doc_max())
        .filter_map(|id| searcher.fetch_doc(id))
        .filter_map(|d| d.get("title"))
        .collect();
    assert_eq!(live, ["c"]);
    assert!(searcher.term_docs("content", "alpha").is_empty());
    assert_eq!(searcher.doc_freq("content", "gamma"), 1);
}

#[test]
fn test_commit_without_changes_publishes_nothing() {
    let (_dir, folder) = fs_folder("test_noop_commit");
    index_docs(&folder, &[doc("a", "alpha")]);

    Indexer::open(Arc::clone(&folder), IndexerOptions::default())
        .unwrap()
        .commit()
        .unwrap();
    assert_eq!(
        file_names::latest_snapshot(folder.as_ref()).unwrap(),
        Some("snapshot_1.json".to_string())
    );
}

#[test]
fn test_small_segments_stay_until_optimized() {
    let (_dir, folder) = fs_folder("test_optimize");
    let big: Vec<Document> = (0..20)
        .map(|i| doc(&format!("big{i}"), &format!("common big{i}")))
        .collect();
    index_docs(&folder, &big);
    index_docs(&folder, &[doc("s1", "common small"), doc("s2", "common small")]);
    index_docs(&folder, &[doc("s3", "common small"), doc("s4", "common small")]);

    assert_eq!(segment_names(&folder), ["segment_1", "segment_2", "segment_3"]);
    let latest = Snapshot::open(folder.as_ref(), None).unwrap();
    assert_eq!(IndexManager::highest_seg_num(&latest), 3);

    let mut indexer = Indexer::open(Arc::clone(&folder), IndexerOptions::default()).unwrap();
    indexer.delete_by_term("title", "s1").unwrap();
    indexer.optimize();
    indexer.commit().unwrap();

    assert_eq!(segment_names(&folder), ["segment_4"]);
    let searcher = IndexSearcher::open(Arc::clone(&folder)).unwrap();
    assert_eq!(searcher.doc_count(), 23);
    assert_eq!(searcher.reader().del_count(), 0);
    assert_eq!(searcher.doc_freq("content", "small"), 3);
    assert!(searcher.term_docs("title", "s1").is_empty());

    // Superseded segments were purged with the commit.
    assert!(!folder.exists("segment_1"));
    assert!(!folder.exists("segment_3"));
}

#[test]
fn test_deletions_survive_later_commits() {
    let (_dir, folder) = fs_folder("test_deletions_persist");
    let big: Vec<Document> = (0..30)
        .map(|i| doc(&format!("d{i}"), "common"))
        .collect();
    index_docs(&folder, &big);

    let mut indexer = Indexer::open(Arc::clone(&folder), IndexerOptions::default()).unwrap();
    indexer.delete_by_term("title", "d7").unwrap();
    indexer.commit().unwrap();

    // One deletion out of thirty stays below the rewrite threshold, so the
    // deletion lives in a deletions-only segment.
    assert_eq!(segment_names(&folder), ["segment_1", "segment_2"]);
    index_docs(&folder, &[doc("new", "fresh")]);

    let reader = IndexSearcher::open(Arc::clone(&folder)).unwrap();
    assert_eq!(reader.doc_count(), 30);
    assert!(reader.term_docs("title", "d7").is_empty());
    assert_eq!(reader.doc_freq("content", "common"), 29);
    assert_eq!(reader.doc_freq("content", "fresh"), 1);
}

#[test]
fn test_truncate_discards_existing_documents() {
    let (_dir, folder) = fs_folder("test_truncate");
    index_docs(&folder, &[doc("a", "alpha"), doc("b", "beta")]);

    let options = IndexerOptions {
        truncate: true,
        ..Default::default()
    };
    let mut indexer = Indexer::open(Arc::clone(&folder), options).unwrap();
    indexer.add_doc(&doc("z", "zeta")).unwrap();
    indexer.commit().unwrap();

    let searcher = IndexSearcher::open(Arc::clone(&folder)).unwrap();
    assert_eq!(searcher.doc_count(), 1);
    assert_eq!(segment_names(&folder), ["segment_2"]);
    assert!(!folder.exists("segment_1"));
}

#[test]
fn test_add_index_copies_live_documents() {
    let (_src_dir, source) = fs_folder("test_add_index_src");
    index_docs(
        &source,
        &[doc("a", "alpha"), doc("b", "beta"), doc("c", "gamma")],
    );
    let mut indexer = Indexer::open(Arc::clone(&source), IndexerOptions::default()).unwrap();
    indexer.delete_by_term("title", "b").unwrap();
    indexer.commit().unwrap();

    let (_dst_dir, target) = fs_folder("test_add_index_dst");
    let mut indexer = Indexer::open(Arc::clone(&target), create_options()).unwrap();
    indexer.add_doc(&doc("x", "xi")).unwrap();
    indexer.add_index(Arc::clone(&source)).unwrap();
    indexer.commit().unwrap();

    let searcher = IndexSearcher::open(Arc::clone(&target)).unwrap();
    assert_eq!(searcher.doc_count(), 3);
    let titles: Vec<&str> = (0..searcher.doc_max())
        .filter_map(|id| searcher.fetch_doc(id))
        .filter_map(|d| d.get("title"))
        .collect();
    assert_eq!(titles, ["x", "a", "c"]);
    assert_eq!(searcher.term_docs("content", "gamma"), [2]);
}

#[test]
fn test_reader_sees_point_in_time() {
    let (_dir, folder) = fs_folder("test_point_in_time");
    index_docs(&folder, &[doc("a", "alpha")]);

    let manager = IndexManager::new(Arc::clone(&folder));
    let mut reader = PolyReader::open(&manager).unwrap();
    assert!(reader.is_locked());

    index_docs(&folder, &[doc("b", "beta")]);
    assert_eq!(reader.doc_count(), 1);
    assert_eq!(reader.snapshot().path(), Some("snapshot_1.json"));
    reader.close().unwrap();
    assert!(!reader.is_locked());

    let reader = PolyReader::open(&manager).unwrap();
    assert_eq!(reader.doc_count(), 2);
}

#[test]
fn test_open_without_index_fails() {
    let (_dir, folder) = fs_folder("test_no_index");
    let err = Indexer::open(Arc::clone(&folder), IndexerOptions::default()).unwrap_err();
    assert!(err.is_not_found());
    let err = IndexSearcher::open(folder).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_dropped_segment_number_is_not_reused_while_pinned() {
    let (_dir, folder) = fs_folder("test_seg_num_reuse");
    index_docs(&folder, &[doc("a", "alpha")]);
    index_docs(&folder, &[doc("b", "bravo")]);
    assert_eq!(segment_names(&folder), ["segment_1", "segment_2"]);

    let searcher = IndexSearcher::open(Arc::clone(&folder)).unwrap();
    assert_eq!(searcher.reader().snapshot().path(), Some("snapshot_2.json"));

    // Empties segment_2, which drops it from the latest snapshot.
    let mut indexer = Indexer::open(Arc::clone(&folder), IndexerOptions::default()).unwrap();
    assert_eq!(indexer.delete_by_term("content", "bravo").unwrap(), 1);
    indexer.commit().unwrap();
    assert_eq!(segment_names(&folder), ["segment_1"]);
    assert!(folder.exists("segment_2"));

    let mut indexer = Indexer::open(Arc::clone(&folder), IndexerOptions::default()).unwrap();
    assert!(indexer.segment().number() > 2);
    indexer.add_doc(&doc("c", "charlie")).unwrap();
    indexer.commit().unwrap();

    let pinned = Snapshot::open(folder.as_ref(), Some("snapshot_2.json")).unwrap();
    let reader = PolyReader::from_snapshot(folder.as_ref(), pinned).unwrap();
    assert_eq!(reader.doc_count(), 2);
    assert_eq!(reader.fetch_doc(1).unwrap().get("content"), Some("bravo"));
    drop(searcher);
}
