use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tempfile::{Builder, TempDir};

use glaive::document::Document;
use glaive::index::{IndexManager, Indexer, IndexerOptions, LockPolicy};
use glaive::search::IndexSearcher;
use glaive::storage::lock::Lock;
use glaive::storage::{Folder, FolderFactory, RamFolder, RamFolderConfig};

fn fs_folder(prefix: &str) -> (TempDir, Arc<dyn Folder>) {
    let dir = Builder::new().prefix(prefix).tempdir().unwrap();
    let folder = FolderFactory::open_fs(dir.path()).unwrap();
    (dir, folder)
}

#[test]
fn test_write_lock_is_exclusive_across_threads() {
    let (_dir, folder) = fs_folder("test_lock_threads");
    let manager = IndexManager::new(folder).with_write_lock(LockPolicy::new(30_000, 1));
    let inside = Arc::new(AtomicUsize::new(0));
    let acquired = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            let inside = Arc::clone(&inside);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                for _ in 0..10 {
                    let mut lock = manager.make_write_lock();
                    lock.obtain().unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    thread::sleep(Duration::from_millis(1));
                    inside.fetch_sub(1, Ordering::SeqCst);
                    acquired.fetch_add(1, Ordering::SeqCst);
                    lock.release().unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(acquired.load(Ordering::SeqCst), 40);
    assert!(!manager.make_write_lock().is_locked().unwrap());
}

#[test]
fn test_obtain_times_out_while_held() {
    let (_dir, folder) = fs_folder("test_lock_timeout");
    let manager = IndexManager::new(folder).with_write_lock(LockPolicy::new(50, 10));

    let mut holder = manager.make_write_lock();
    holder.obtain().unwrap();

    let mut waiter = manager.make_write_lock();
    let err = waiter.obtain().unwrap_err();
    assert!(err.is_lock_contention());
    assert!(!waiter.is_held());
    assert!(waiter.release().is_err());

    holder.release().unwrap();
    waiter.obtain().unwrap();
}

#[test]
fn test_waiter_gets_lock_once_released() {
    let (_dir, folder) = fs_folder("test_lock_handoff");
    let manager = IndexManager::new(folder).with_write_lock(LockPolicy::new(5_000, 5));

    let mut holder = manager.make_write_lock();
    holder.obtain().unwrap();

    let waiter_manager = manager.clone();
    let waiter = thread::spawn(move || {
        let mut lock = waiter_manager.make_write_lock();
        lock.obtain().map(|_| lock.is_held())
    });

    thread::sleep(Duration::from_millis(50));
    holder.release().unwrap();
    assert!(waiter.join().unwrap().unwrap());
}

#[test]
fn test_snapshot_read_locks_are_shared() {
    let (_dir, folder) = fs_folder("test_shared_lock");
    let manager = IndexManager::new(folder);

    let mut first = manager.make_snapshot_read_lock("snapshot_1.json").unwrap();
    let mut second = manager.make_snapshot_read_lock("snapshot_1.json").unwrap();
    first.obtain().unwrap();
    second.obtain().unwrap();
    assert_ne!(first.lock_path(), second.lock_path());

    let observer = manager.make_snapshot_read_lock("snapshot_1.json").unwrap();
    assert!(observer.is_locked().unwrap());
    first.release().unwrap();
    assert!(observer.is_locked().unwrap());
    second.release().unwrap();
    assert!(!observer.is_locked().unwrap());

    assert!(manager.make_snapshot_read_lock("segment_1").is_err());
}

#[test]
fn test_dropped_lock_is_released() {
    let (_dir, folder) = fs_folder("test_lock_drop");
    let manager = IndexManager::new(folder);
    {
        let mut lock = manager.make_merge_lock();
        lock.obtain().unwrap();
        assert!(lock.is_locked().unwrap());
    }
    assert!(!manager.make_merge_lock().is_locked().unwrap());
}

#[cfg(unix)]
#[test]
fn test_stale_write_lock_from_dead_process_is_cleared() {
    use chrono::Utc;
    use glaive::storage::lock::LockRecord;

    let (_dir, folder) = fs_folder("test_stale_lock");
    let manager = IndexManager::new(Arc::clone(&folder));
    let record = LockRecord {
        name: "write".to_string(),
        host: manager.host().to_string(),
        pid: 999_999_999,
        token: "left-behind".to_string(),
        acquired_at: Utc::now(),
    };
    folder
        .write_file(
            manager.make_write_lock().lock_path(),
            &serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();

    let options = IndexerOptions {
        create: true,
        ..Default::default()
    };
    let mut indexer = Indexer::open(Arc::clone(&folder), options).unwrap();
    indexer
        .add_doc(&Document::builder().add_text("content", "recovered").build())
        .unwrap();
    indexer.commit().unwrap();

    let searcher = IndexSearcher::open(folder).unwrap();
    assert_eq!(searcher.doc_count(), 1);
}

#[cfg(unix)]
#[test]
fn test_racing_stale_clearers_grant_one_holder() {
    use chrono::Utc;
    use glaive::storage::lock::LockRecord;

    const RACERS: usize = 4;

    for trial in 0..300 {
        let folder: Arc<dyn Folder> = Arc::new(RamFolder::new(RamFolderConfig::default()));
        let manager = IndexManager::new(Arc::clone(&folder));
        let record = LockRecord {
            name: "write".to_string(),
            host: manager.host().to_string(),
            pid: 999_999_999,
            token: "left-behind".to_string(),
            acquired_at: Utc::now(),
        };
        folder
            .write_file(
                manager.make_write_lock().lock_path(),
                &serde_json::to_vec(&record).unwrap(),
            )
            .unwrap();

        let barrier = Arc::new(Barrier::new(RACERS));
        let handles: Vec<_> = (0..RACERS)
            .map(|_| {
                let manager = manager.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut lock = manager.make_write_lock();
                    barrier.wait();
                    lock.request().ok().map(|_| lock)
                })
            })
            .collect();

        let holders: Vec<_> = handles
            .into_iter()
            .filter_map(|handle| handle.join().unwrap())
            .collect();
        assert_eq!(holders.len(), 1, "trial {trial}");

        let holder = manager.make_write_lock().holder().unwrap().unwrap();
        assert_ne!(holder.token, "left-behind");
        drop(holders);
        assert!(!manager.make_write_lock().is_locked().unwrap());
    }
}

#[test]
fn test_lock_held_by_other_host_is_respected() {
    use chrono::Utc;
    use glaive::storage::lock::LockRecord;

    let (_dir, folder) = fs_folder("test_foreign_lock");
    let manager = IndexManager::new(Arc::clone(&folder));
    let record = LockRecord {
        name: "write".to_string(),
        host: format!("{}-elsewhere", manager.host()),
        pid: 999_999_999,
        token: "foreign".to_string(),
        acquired_at: Utc::now(),
    };
    folder
        .write_file(
            manager.make_write_lock().lock_path(),
            &serde_json::to_vec(&record).unwrap(),
        )
        .unwrap();

    let mut options = IndexerOptions {
        create: true,
        ..Default::default()
    };
    options.manager.write_lock = LockPolicy::new(0, 0);
    let err = Indexer::open(folder, options).unwrap_err();
    assert!(err.is_lock_contention());
}
