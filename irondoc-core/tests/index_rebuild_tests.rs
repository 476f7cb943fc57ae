// index_rebuild_tests.rs
// Secondary index lifecycle: create, drop, recreate and rebuild from the heap

mod common;

use common::{ids, open, person, person_in, Person};
use irondoc_core::query::field;
use irondoc_core::{Collection, IndexOptions, IronDocError, IsolationLevel};

async fn fill(people: &Collection<Person>, count: i64) {
    for age in 0..count {
        people
            .insert(person_in(&format!("p{}", age), age, if age % 3 == 0 { "Oslo" } else { "Rome" }))
            .await
            .unwrap();
    }
}

async fn full_scan_ids(people: &Collection<Person>, keep: impl Fn(&Person) -> bool) -> Vec<irondoc_core::DocumentId> {
    let all = people.scan_all().to_list().await.unwrap();
    let kept: Vec<Person> = all.into_iter().filter(|p| keep(p)).collect();
    ids(&kept)
}

// ========== REBUILD ==========

/// Test: rebuilt indexes answer queries exactly like a full scan
#[tokio::test]
async fn test_rebuild_all_matches_full_scan() {
    let (_db, people) = open(IsolationLevel::Snapshot);
    people.create_index(IndexOptions::new("age")).await.unwrap();
    people.create_index(IndexOptions::new("city")).await.unwrap();
    fill(&people, 30).await;

    let rebuilt = people.rebuild_service().rebuild_all().await.unwrap();
    assert_eq!(rebuilt, 60);
    assert_eq!(people.rebuild_service().progress(), 60);

    let query = people.query().filter(field("age").ge(12).and(field("age").lt(20)));
    assert!(query.explain().unwrap().is_range_scan());
    assert_eq!(
        ids(&query.to_list().await.unwrap()),
        full_scan_ids(&people, |p| (12..20).contains(&p.age)).await
    );

    let oslo = people.query().filter(field("city").eq("Oslo"));
    assert!(oslo.explain().unwrap().is_point_lookup());
    assert_eq!(
        ids(&oslo.to_list().await.unwrap()),
        full_scan_ids(&people, |p| p.city.as_deref() == Some("Oslo")).await
    );
}

#[tokio::test]
async fn test_rebuild_index_is_idempotent() {
    let (_db, people) = open(IsolationLevel::Optimistic);
    fill(&people, 10).await;
    people.create_index(IndexOptions::new("age")).await.unwrap();

    for _ in 0..3 {
        assert_eq!(people.rebuild_service().rebuild_index("age").await.unwrap(), 10);
        assert_eq!(people.rebuild_service().progress(), 10);
    }
    let hits = people.query().filter(field("age").eq(4)).to_list().await.unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_rebuild_missing_index() {
    let (_db, people) = open(IsolationLevel::Snapshot);
    assert!(matches!(
        people.rebuild_service().rebuild_index("age").await,
        Err(IronDocError::IndexNotFound(_))
    ));
    assert_eq!(people.rebuild_service().rebuild_all().await.unwrap(), 0);
}

/// Test: rebuild skips nothing that was deleted and misses nothing that moved
#[tokio::test]
async fn test_rebuild_after_updates_and_deletes() {
    let (_db, people) = open(IsolationLevel::Snapshot);
    people.create_index(IndexOptions::new("age")).await.unwrap();

    let mut inserted = Vec::new();
    for age in 0..12 {
        inserted.push(people.insert(person(&format!("p{}", age), age)).await.unwrap());
    }
    for id in inserted.iter().step_by(3) {
        people.delete(*id).await.unwrap();
    }
    // long names force relocation to another heap page
    for id in inserted.iter().skip(1).step_by(3) {
        let mut doc = people.find(*id).await.unwrap().unwrap();
        doc.name = "x".repeat(150);
        doc.age += 100;
        people.update(*id, doc).await.unwrap();
    }

    assert_eq!(people.rebuild_service().rebuild_index("age").await.unwrap(), 8);
    let moved = people.query().filter(field("age").ge(100)).to_list().await.unwrap();
    assert_eq!(ids(&moved), full_scan_ids(&people, |p| p.age >= 100).await);
    assert_eq!(moved.len(), 4);
}

// ========== DROP AND RECREATE ==========

#[tokio::test]
async fn test_drop_and_recreate_index() {
    let (_db, people) = open(IsolationLevel::Snapshot);
    fill(&people, 8).await;
    people.create_index(IndexOptions::new("age").unique()).await.unwrap();
    assert!(matches!(
        people.create_index(IndexOptions::new("age")).await,
        Err(IronDocError::InvalidArgument(_))
    ));

    people.drop_index("age").unwrap();
    let query = people.query().filter(field("age").eq(5));
    assert!(query.explain().unwrap().is_full_scan());
    assert_eq!(query.count().await.unwrap(), 1);

    // documents written while unindexed are picked up on recreation
    people.insert(person("late", 5)).await.unwrap();
    people.create_index(IndexOptions::new("age")).await.unwrap();
    assert!(query.explain().unwrap().is_point_lookup());
    assert_eq!(query.count().await.unwrap(), 2);
    assert_eq!(people.indexes(), vec!["age".to_string()]);
}

#[tokio::test]
async fn test_recreate_as_unique_over_duplicates_fails() {
    let (_db, people) = open(IsolationLevel::Snapshot);
    people.insert(person("a", 1)).await.unwrap();
    people.insert(person("b", 1)).await.unwrap();

    assert!(matches!(
        people.create_index(IndexOptions::new("age").unique()).await,
        Err(IronDocError::DuplicateKey(_))
    ));
    assert!(people.indexes().is_empty());
    assert_eq!(people.query().filter(field("age").eq(1)).count().await.unwrap(), 2);
}

// ========== CONCURRENT REBUILD ==========

/// Test: snapshot readers keep their view while a rebuild commits
#[tokio::test]
async fn test_rebuild_does_not_disturb_open_snapshot() {
    let (db, people) = open(IsolationLevel::Snapshot);
    people.create_index(IndexOptions::new("age")).await.unwrap();
    fill(&people, 6).await;

    let reader = db.begin_transaction().await.unwrap();
    let before = people.query_in(&reader).filter(field("age").lt(3)).count().await.unwrap();

    assert_eq!(people.rebuild_service().rebuild_all().await.unwrap(), 6);

    let after = people.query_in(&reader).filter(field("age").lt(3)).count().await.unwrap();
    assert_eq!(before, after);
    assert_eq!(before, 3);
    reader.commit().await.unwrap();
}

// ========== INDEX CREATED UNDER AN OPEN SNAPSHOT ==========

/// Test: a snapshot opened before an index existed keeps full-scanning
#[tokio::test]
async fn test_index_created_after_snapshot_is_not_used_by_it() {
    let (db, people) = open(IsolationLevel::Snapshot);
    fill(&people, 5).await;

    let reader = db.begin_transaction().await.unwrap();
    people.create_index(IndexOptions::new("age")).await.unwrap();
    people.insert(person("late", 2)).await.unwrap();

    let snapshot_docs = people.scan_all_in(&reader).to_list().await.unwrap();
    assert_eq!(snapshot_docs.len(), 5);

    let exact = people.query_in(&reader).filter(field("age").eq(2));
    assert!(exact.explain().unwrap().is_full_scan());
    assert_eq!(exact.count().await.unwrap(), 1);

    let range = people.query_in(&reader).filter(field("age").ge(2));
    assert!(range.explain().unwrap().is_full_scan());
    let expected: Vec<Person> = snapshot_docs.into_iter().filter(|p| p.age >= 2).collect();
    assert_eq!(ids(&range.to_list().await.unwrap()), ids(&expected));

    // views that began after the build use the index and see the late insert
    let fresh = people.query().filter(field("age").eq(2));
    assert!(fresh.explain().unwrap().is_point_lookup());
    assert_eq!(fresh.count().await.unwrap(), 2);

    let later = db.begin_transaction().await.unwrap();
    let inside = people.query_in(&later).filter(field("age").eq(2));
    assert!(inside.explain().unwrap().is_point_lookup());
    assert_eq!(inside.count().await.unwrap(), 2);

    reader.commit().await.unwrap();
    later.commit().await.unwrap();
}

/// Test: writes staged before an index existed stay visible to their own transaction
#[tokio::test]
async fn test_index_created_after_own_writes_is_not_used() {
    let (db, people) = open(IsolationLevel::Optimistic);
    fill(&people, 5).await;

    let writer = db.begin_transaction().await.unwrap();
    people.insert_in(&writer, person("pending", 9)).await.unwrap();
    people.create_index(IndexOptions::new("age")).await.unwrap();

    let own = people.query_in(&writer).filter(field("age").eq(9));
    assert!(own.explain().unwrap().is_full_scan());
    assert_eq!(own.count().await.unwrap(), 1);
    assert_eq!(people.query().filter(field("age").eq(9)).count().await.unwrap(), 0);
    writer.rollback().await.unwrap();
}
