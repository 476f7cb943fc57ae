// concurrency_tests.rs
// Isolation strategies observed through the collection surface:
// snapshot visibility, write-write conflicts, OCC validation and retry

mod common;

use common::{ids, open, person};
use irondoc_core::query::field;
use irondoc_core::{IronDocError, IsolationLevel, Transaction};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;

/// Commit both transactions at the same moment from two tasks
async fn commit_concurrently(a: Transaction, b: Transaction) -> Vec<Result<(), IronDocError>> {
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [a, b]
        .into_iter()
        .map(|txn| {
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                txn.commit().await.map(|_| ())
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.expect("commit task panicked"));
    }
    results
}

fn assert_one_winner(results: &[Result<(), IronDocError>]) {
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(IronDocError::Conflict { .. })))
        .count();
    assert_eq!((wins, conflicts), (1, 1), "results: {:?}", results);
}

// ========== MVCC VISIBILITY ==========

/// Test: a snapshot opened before a writer commits never sees its rows
#[tokio::test]
async fn test_snapshot_never_sees_later_commit() {
    let (db, people) = open(IsolationLevel::Snapshot);
    people.insert(person("before", 1)).await.unwrap();

    let writer = db.begin_transaction().await.unwrap();
    let reader = db.begin_transaction().await.unwrap();
    let id = people.insert_in(&writer, person("during", 2)).await.unwrap();
    writer.commit().await.unwrap();

    // writer was still in progress when the reader's snapshot was taken
    assert!(people.find_in(&reader, id).await.unwrap().is_none());
    assert_eq!(people.query_in(&reader).count().await.unwrap(), 1);
    assert_eq!(people.scan_all_in(&reader).count().await.unwrap(), 1);

    let late = db.begin_transaction().await.unwrap();
    let id_late = people.insert_in(&late, person("late", 3)).await.unwrap();
    late.commit().await.unwrap();
    assert!(people.find_in(&reader, id_late).await.unwrap().is_none());
    reader.rollback().await.unwrap();

    // a snapshot opened after both commits sees everything
    let after = db.begin_transaction().await.unwrap();
    assert!(people.find_in(&after, id).await.unwrap().is_some());
    assert_eq!(people.query_in(&after).count().await.unwrap(), 3);
}

/// Test: snapshot queries read the version current at snapshot time
#[tokio::test]
async fn test_snapshot_reads_old_version_of_updated_document() {
    let (db, people) = open(IsolationLevel::Snapshot);
    let id = people.insert(person("v", 10)).await.unwrap();

    let reader = db.begin_transaction().await.unwrap();
    people.update(id, person("v", 11)).await.unwrap();

    assert_eq!(people.find_in(&reader, id).await.unwrap().unwrap().age, 10);
    let matches = people
        .query_in(&reader)
        .filter(field("age").eq(10))
        .to_list()
        .await
        .unwrap();
    assert_eq!(ids(&matches), vec![id]);
    assert_eq!(people.find(id).await.unwrap().unwrap().age, 11);
}

/// Test: two snapshot writers of the same document; the newer one wins
#[tokio::test]
async fn test_mvcc_write_write_conflict_has_one_winner() {
    let (db, people) = open(IsolationLevel::Snapshot);
    let id = people.insert(person("shared", 1)).await.unwrap();

    let older = db.begin_transaction().await.unwrap();
    let newer = db.begin_transaction().await.unwrap();
    people.update_in(&older, id, person("shared", 2)).await.unwrap();
    people.update_in(&newer, id, person("shared", 3)).await.unwrap();

    let older_result = older.commit().await.map(|_| ());
    let newer_result = newer.commit().await.map(|_| ());
    assert!(matches!(older_result, Err(IronDocError::Conflict { .. })));
    assert!(newer_result.is_ok());
    assert_eq!(people.find(id).await.unwrap().unwrap().age, 3);
}

// ========== OCC ==========

/// Test: OCC writers of disjoint pages both commit
#[tokio::test]
async fn test_occ_disjoint_pages_both_commit() {
    let (db, _people) = open(IsolationLevel::Optimistic);
    let left = db.engine().bootstrap_page(b"left".to_vec());
    let right = db.engine().bootstrap_page(b"right".to_vec());

    let a = db.begin_transaction().await.unwrap();
    let b = db.begin_transaction().await.unwrap();
    a.write(left, b"left-a".to_vec()).unwrap();
    b.write(right, b"right-b".to_vec()).unwrap();

    let results = commit_concurrently(a, b).await;
    assert!(results.iter().all(|r| r.is_ok()), "results: {:?}", results);
    assert_eq!(db.engine().read_latest(left).as_deref(), Some(&b"left-a"[..]));
    assert_eq!(db.engine().read_latest(right).as_deref(), Some(&b"right-b"[..]));
}

/// Test: OCC writers of one page, committed at once: one succeeds, one conflicts
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_occ_same_page_exactly_one_commits() {
    let (db, _people) = open(IsolationLevel::Optimistic);
    let page = db.engine().bootstrap_page(b"v0".to_vec());

    let a = db.begin_transaction().await.unwrap();
    let b = db.begin_transaction().await.unwrap();
    a.write(page, b"a".to_vec()).unwrap();
    b.write(page, b"b".to_vec()).unwrap();

    let results = commit_concurrently(a, b).await;
    assert_one_winner(&results);
}

/// Test: concurrent OCC updates of one document through the collection
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_occ_document_update_race() {
    let (db, people) = open(IsolationLevel::Optimistic);
    let id = people.insert(person("raced", 0)).await.unwrap();

    let a = db.begin_transaction().await.unwrap();
    let b = db.begin_transaction().await.unwrap();
    people.update_in(&a, id, person("raced", 1)).await.unwrap();
    people.update_in(&b, id, person("raced", 2)).await.unwrap();

    let results = commit_concurrently(a, b).await;
    assert_one_winner(&results);
    let age = people.find(id).await.unwrap().unwrap().age;
    assert!(age == 1 || age == 2);
}

// ========== RETRY ==========

/// Test: an always-conflicting operation runs exactly max_retries + 1 times
#[tokio::test]
async fn test_retry_gives_up_after_max_retries() {
    let (db, _people) = open(IsolationLevel::Optimistic);
    let attempts = Arc::new(AtomicU32::new(0));

    let result: Result<(), IronDocError> = db
        .retry()
        .with_max_retries(3)
        .execute(|txn| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(IronDocError::Conflict {
                    transaction_id: txn.id(),
                    page_id: irondoc_core::storage::PageId(1),
                })
            }
        })
        .await;

    assert!(matches!(result, Err(IronDocError::MaxRetriesExceeded { max_retries: 3 })));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

/// Test: a commit that loses validation is replayed and then succeeds
#[tokio::test]
async fn test_retry_recovers_from_lost_validation() {
    let (db, people) = open(IsolationLevel::Optimistic);
    let id = people.insert(person("counter", 0)).await.unwrap();
    let attempts = Arc::new(AtomicU32::new(0));

    db.retry()
        .execute(|txn| {
            let people = people.clone();
            let attempts = attempts.clone();
            async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                let current = people.find_in(&txn, id).await?.expect("document exists");
                people.update_in(&txn, id, person("counter", current.age + 10)).await?;
                if attempt == 0 {
                    // a competing writer commits first and invalidates this attempt
                    people.update(id, person("counter", 100)).await?;
                }
                Ok::<(), IronDocError>(())
            }
        })
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(people.find(id).await.unwrap().unwrap().age, 110);
}

/// Test: non-conflict errors are returned without retrying
#[tokio::test]
async fn test_retry_does_not_retry_fatal_errors() {
    let (db, _people) = open(IsolationLevel::Optimistic);
    let attempts = Arc::new(AtomicU32::new(0));

    let result: Result<(), IronDocError> = db
        .retry()
        .execute(|_txn| {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(IronDocError::DuplicateKey("id".into()))
            }
        })
        .await;

    assert!(matches!(result, Err(IronDocError::DuplicateKey(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

// ========== NO ISOLATION ==========

/// Test: without isolation an open transaction reads the newest committed state
#[tokio::test]
async fn test_no_isolation_reads_committed() {
    let (db, people) = open(IsolationLevel::None);
    let reader = db.begin_transaction().await.unwrap();
    let id = people.insert(person("visible", 1)).await.unwrap();

    assert!(people.find_in(&reader, id).await.unwrap().is_some());
}

/// Test: without isolation both writers of one page commit; the last one wins
#[tokio::test]
async fn test_no_isolation_never_conflicts() {
    let (db, people) = open(IsolationLevel::None);
    let id = people.insert(person("shared", 0)).await.unwrap();

    let a = db.begin_transaction().await.unwrap();
    let b = db.begin_transaction().await.unwrap();
    people.update_in(&a, id, person("shared", 1)).await.unwrap();
    people.update_in(&b, id, person("shared", 2)).await.unwrap();
    a.commit().await.unwrap();
    b.commit().await.unwrap();

    assert_eq!(people.find(id).await.unwrap().unwrap().age, 2);
}

// ========== MAINTENANCE ==========

/// Test: maintenance keeps versions an open snapshot needs and prunes them afterwards
#[tokio::test]
async fn test_maintenance_respects_open_snapshots() {
    let (db, people) = open(IsolationLevel::Snapshot);
    let id = people.insert(person("aging", 1)).await.unwrap();

    let reader = db.begin_transaction().await.unwrap();
    for age in 2..6 {
        people.update(id, person("aging", age)).await.unwrap();
    }

    db.run_maintenance();
    assert_eq!(people.find_in(&reader, id).await.unwrap().unwrap().age, 1);

    reader.rollback().await.unwrap();
    let stats = db.run_maintenance();
    assert!(stats.versions_pruned > 0);
    assert_eq!(people.find(id).await.unwrap().unwrap().age, 5);
}
