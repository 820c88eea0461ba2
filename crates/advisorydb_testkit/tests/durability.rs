//! Persistence, crash and recovery behavior of file-backed stores.

use advisorydb_core::log::FILE_HEADER_SIZE;
use advisorydb_core::{
    AdvisoryReader, AdvisoryWriter, BucketPath, BucketView, CoreError, Store, StoreOptions,
};
use advisorydb_storage::InMemoryBackend;
use advisorydb_testkit::crash::{append_garbage, truncate_tail, CrashableBackend};
use advisorydb_testkit::fixtures::{samples, scenarios};
use advisorydb_testkit::{init_test_tracing, TestStore};
use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

fn vulnerability() -> BucketPath {
    BucketPath::root("vulnerability").unwrap()
}

#[test]
fn commits_survive_reopen() {
    let mut test_store = TestStore::file();
    test_store
        .update(|tx| {
            tx.put_data_source(samples::GHSA_PIP, &samples::ghsa_pip())?;
            let advisory = samples::advisory("2.0");
            tx.put_advisory_detail("CVE-2021-1", "flask", &[samples::GHSA_PIP], &advisory)?;
            tx.save_advisory_details("CVE-2021-1")
        })
        .unwrap();
    test_store.delete_advisory_detail_bucket().unwrap();

    test_store.reopen(StoreOptions::default());
    let advisories = test_store.get_advisories("pip::", "flask").unwrap();
    assert_eq!(advisories.len(), 1);
    assert_eq!(advisories[0].data_source, Some(samples::ghsa_pip()));
    assert!(test_store
        .view(|tx| Ok(tx.root_bucket("advisory-detail").is_none()))
        .unwrap());
}

#[test]
fn torn_tail_loses_only_the_last_commit() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let file = Store::path(dir.path());
    {
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        store.update(|tx| tx.put(&vulnerability(), "CVE-1", "kept")).unwrap();
        store.update(|tx| tx.put(&vulnerability(), "CVE-2", "torn")).unwrap();
    }
    truncate_tail(&file, 3).unwrap();
    let torn_len = fs::metadata(&file).unwrap().len();

    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    assert!(!store.recovered_from_corruption());
    assert!(store.get(&vulnerability(), "CVE-1").unwrap().is_some());
    assert!(store.get(&vulnerability(), "CVE-2").unwrap().is_none());
    assert!(store.stats().unwrap().file_size < torn_len);

    // New commits land after the truncated tail and replay cleanly.
    store.update(|tx| tx.put(&vulnerability(), "CVE-3", "new")).unwrap();
    store.close().unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    assert!(store.get(&vulnerability(), "CVE-3").unwrap().is_some());
}

#[test]
fn short_garbage_is_a_torn_write_long_garbage_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let file = Store::path(dir.path());
    Store::open(dir.path(), StoreOptions::default())
        .unwrap()
        .update(|tx| tx.put(&vulnerability(), "CVE-1", "x"))
        .unwrap();

    append_garbage(&file, b"AL").unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    assert!(!store.recovered_from_corruption());
    assert!(store.get(&vulnerability(), "CVE-1").unwrap().is_some());
    store.close().unwrap();

    append_garbage(&file, &[0xEE; 64]).unwrap();
    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    assert!(store.recovered_from_corruption());
    assert!(store.get(&vulnerability(), "CVE-1").unwrap().is_none());
}

#[test]
fn damaged_header_is_recreated() {
    let dir = tempfile::tempdir().unwrap();
    drop(Store::open(dir.path(), StoreOptions::default()).unwrap());
    let file = Store::path(dir.path());
    fs::write(&file, b"not a store file at all").unwrap();

    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    assert!(store.recovered_from_corruption());
    assert_eq!(
        store.stats().unwrap().file_size,
        FILE_HEADER_SIZE as u64
    );
}

#[test]
fn read_only_stores_never_repair() {
    let dir = tempfile::tempdir().unwrap();
    let options = StoreOptions::default().read_only(true);
    assert!(matches!(
        Store::open(dir.path(), options.clone()),
        Err(CoreError::NotInitialized { .. })
    ));

    drop(Store::open(dir.path(), StoreOptions::default()).unwrap());
    let file = Store::path(dir.path());
    append_garbage(&file, &[0xEE; 64]).unwrap();
    let before = fs::read(&file).unwrap();

    let err = Store::open(dir.path(), options).unwrap_err();
    assert!(err.is_corruption());
    assert_eq!(fs::read(&file).unwrap(), before);
}

#[test]
fn readers_share_the_lock_and_exclude_writers() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
        store.update(|tx| tx.put(&vulnerability(), "CVE-1", "x")).unwrap();
    }

    let read_only = StoreOptions::default()
        .read_only(true)
        .timeout(Duration::from_millis(100));
    let first = Store::open(dir.path(), read_only.clone()).unwrap();
    let second = Store::open(dir.path(), read_only).unwrap();
    assert!(second.get(&vulnerability(), "CVE-1").unwrap().is_some());
    assert!(matches!(
        first.update(|tx| tx.put(&vulnerability(), "CVE-2", "y")),
        Err(CoreError::ReadOnly)
    ));

    let writer = Store::open(
        dir.path(),
        StoreOptions::default().timeout(Duration::from_millis(100)),
    );
    assert!(matches!(writer, Err(CoreError::LockTimeout { .. })));

    drop(first);
    drop(second);
    assert!(Store::open(dir.path(), StoreOptions::default()).is_ok());
}

#[test]
fn waiting_writer_stays_out_across_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let first = Store::open(dir.path(), StoreOptions::default()).unwrap();
    first.update(|tx| tx.put(&vulnerability(), "CVE-A", "first")).unwrap();

    let (opened, waiting) = mpsc::channel();
    let root = dir.path().to_path_buf();
    let second = thread::spawn(move || {
        let store = Store::open(&root, StoreOptions::default()).unwrap();
        opened.send(()).unwrap();
        store.update(|tx| tx.put(&vulnerability(), "CVE-B", "second")).unwrap();
        store.close().unwrap();
    });

    thread::sleep(Duration::from_millis(50));
    first.compact().unwrap();
    first.update(|tx| tx.put(&vulnerability(), "CVE-C", "after compaction")).unwrap();
    assert!(waiting.recv_timeout(Duration::from_millis(200)).is_err());

    first.close().unwrap();
    waiting.recv_timeout(Duration::from_secs(10)).unwrap();
    second.join().unwrap();

    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    for key in ["CVE-A", "CVE-B", "CVE-C"] {
        assert!(store.get(&vulnerability(), key).unwrap().is_some(), "{key}");
    }
}

#[test]
fn waiting_writer_stays_out_across_recovery() {
    let dir = tempfile::tempdir().unwrap();
    drop(Store::open(dir.path(), StoreOptions::default()).unwrap());
    append_garbage(&Store::path(dir.path()), &[0xEE; 64]).unwrap();

    let first = Store::open(dir.path(), StoreOptions::default()).unwrap();
    assert!(first.recovered_from_corruption());
    first.update(|tx| tx.put(&vulnerability(), "CVE-A", "rebuilt")).unwrap();

    let second = Store::open(
        dir.path(),
        StoreOptions::default().timeout(Duration::from_millis(50)),
    );
    assert!(matches!(second, Err(CoreError::LockTimeout { .. })));
    first.close().unwrap();

    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    assert!(store.get(&vulnerability(), "CVE-A").unwrap().is_some());
}

#[test]
fn failed_append_is_rolled_back() {
    let memory = InMemoryBackend::new();
    let (backend, switch) = CrashableBackend::new(Box::new(memory.clone()));
    let store = Store::open_with_backend(Box::new(backend), StoreOptions::default()).unwrap();
    store.update(|tx| tx.put(&vulnerability(), "CVE-1", "kept")).unwrap();
    let size = memory.data().len();

    switch.crash_after(5);
    let err = store
        .update(|tx| tx.put(&vulnerability(), "CVE-2", "lost"))
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(_)));
    assert!(switch.has_crashed());
    assert_eq!(memory.data().len(), size);
    assert!(store.get(&vulnerability(), "CVE-2").unwrap().is_none());

    switch.reset();
    store.update(|tx| tx.put(&vulnerability(), "CVE-3", "after")).unwrap();
    drop(store);

    let reopened =
        Store::open_with_backend(Box::new(memory.clone()), StoreOptions::default()).unwrap();
    assert!(!reopened.recovered_from_corruption());
    assert!(reopened.get(&vulnerability(), "CVE-1").unwrap().is_some());
    assert!(reopened.get(&vulnerability(), "CVE-2").unwrap().is_none());
    assert!(reopened.get(&vulnerability(), "CVE-3").unwrap().is_some());
}

#[test]
fn failed_sync_fails_the_commit() {
    let memory = InMemoryBackend::new();
    let (backend, switch) = CrashableBackend::new(Box::new(memory.clone()));
    let store = Store::open_with_backend(Box::new(backend), StoreOptions::default()).unwrap();

    switch.set_fail_on_sync(true);
    assert!(store
        .update(|tx| tx.put(&vulnerability(), "CVE-1", "x"))
        .is_err());
    assert!(store.get(&vulnerability(), "CVE-1").unwrap().is_none());

    switch.set_fail_on_sync(false);
    store.update(|tx| tx.put(&vulnerability(), "CVE-1", "x")).unwrap();
    assert!(store.get(&vulnerability(), "CVE-1").unwrap().is_some());
}

#[test]
fn close_compacts_a_mostly_dead_file() {
    let dir = tempfile::tempdir().unwrap();
    let value = vec![0x5Au8; 256 * 1024];
    {
        let store = Store::open(dir.path(), StoreOptions::default().no_sync(true)).unwrap();
        for _ in 0..24 {
            store
                .update(|tx| tx.put_bytes(&vulnerability(), "CVE-2021-44228", value.clone()))
                .unwrap();
        }
        assert!(store.stats().unwrap().file_size > 6 * 1024 * 1024);
        store.close().unwrap();
    }
    let file = Store::path(dir.path());
    assert!(fs::metadata(&file).unwrap().len() < 512 * 1024);

    let store = Store::open(dir.path(), StoreOptions::default()).unwrap();
    assert_eq!(store.stats().unwrap().sequence.as_u64(), 24);
    assert_eq!(
        store.get(&vulnerability(), "CVE-2021-44228").unwrap(),
        Some(value)
    );
}

#[test]
fn close_leaves_history_when_asked_to() {
    let dir = tempfile::tempdir().unwrap();
    let value = vec![0x5Au8; 256 * 1024];
    let options = StoreOptions::default().no_sync(true).no_freelist_sync(true);
    let store = Store::open(dir.path(), options).unwrap();
    for _ in 0..24 {
        store
            .update(|tx| tx.put_bytes(&vulnerability(), "CVE-2021-44228", value.clone()))
            .unwrap();
    }
    let size = store.stats().unwrap().file_size;
    store.close().unwrap();
    assert_eq!(fs::metadata(Store::path(dir.path())).unwrap().len(), size);
}

#[test]
fn closed_stores_refuse_work() {
    let test_store = scenarios::populated_store(3);
    test_store.close().unwrap();
    test_store.close().unwrap();

    assert!(matches!(
        test_store.get_advisories(samples::GHSA_PIP, "django"),
        Err(CoreError::DatabaseClosed)
    ));
    assert!(matches!(
        test_store.batch_update(|_| Ok(())),
        Err(CoreError::DatabaseClosed)
    ));
}
