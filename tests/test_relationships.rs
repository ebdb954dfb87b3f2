//! Integration tests for the relationship graph and its materializer.
//!
//! Run with:
//!   cargo test --test test_relationships

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use argus::error::AppError;
use argus::ingest;
use argus::relationships::Materializer;
use argus::store::encounters::{EncounterStore, NewEncounter};
use argus::store::relationships::RelationshipStore;
use argus::store::Database;

// ── helpers ──────────────────────────────────────────────────────────────────

fn open_db() -> (TempDir, Database) {
    let tmp = TempDir::new().expect("tempdir");
    let db = Database::open(&tmp.path().join("argus.db"), 5000).expect("open db");
    (tmp, db)
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

fn t1() -> DateTime<Utc> {
    t0() + Duration::hours(6)
}

// ── Materializer ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn three_then_two_persons_example() {
    let (_tmp, db) = open_db();
    let store = RelationshipStore::new(db);
    let m = Materializer::new(store.clone());

    assert_eq!(m.register_cooccurrence(&[1, 2, 3], 100, t0()).await.unwrap(), 3);
    assert_eq!(m.register_cooccurrence(&[1, 2], 101, t1()).await.unwrap(), 1);

    let e12 = m.edge_between(1, 2).await.unwrap().expect("edge 1-2");
    assert_eq!(e12.weight, 2);
    assert_eq!(e12.first_seen, "2024-03-01T10:00:00Z");
    assert_eq!(e12.last_seen, "2024-03-01T16:00:00Z");
    assert_eq!((e12.first_event_id, e12.last_event_id), (100, 101));

    for (x, y) in [(1, 3), (2, 3)] {
        let e = m.edge_between(x, y).await.unwrap().expect("edge");
        assert_eq!(e.weight, 1);
        assert_eq!(e.first_seen, e.last_seen);
        assert_eq!((e.first_event_id, e.last_event_id), (100, 100));
    }
    assert_eq!(store.count().unwrap(), 3);
}

#[tokio::test]
async fn argument_order_never_creates_a_second_edge() {
    let (_tmp, db) = open_db();
    let store = RelationshipStore::new(db);
    let m = Materializer::new(store.clone());

    m.register_cooccurrence(&[9, 4], 1, t0()).await.unwrap();
    m.register_cooccurrence(&[4, 9], 2, t1()).await.unwrap();

    assert_eq!(store.count().unwrap(), 1);
    let e = m.edge_between(9, 4).await.unwrap().unwrap();
    assert_eq!((e.person_a, e.person_b, e.weight), (4, 9, 2));
}

#[tokio::test]
async fn fewer_than_two_distinct_persons_is_a_noop() {
    let (_tmp, db) = open_db();
    let store = RelationshipStore::new(db);
    let m = Materializer::new(store.clone());

    assert_eq!(m.register_cooccurrence(&[], 1, t0()).await.unwrap(), 0);
    assert_eq!(m.register_cooccurrence(&[7], 2, t0()).await.unwrap(), 0);
    assert_eq!(m.register_cooccurrence(&[7, 7, 7], 3, t0()).await.unwrap(), 0);
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test]
async fn duplicated_ids_count_once_per_event() {
    let (_tmp, db) = open_db();
    let m = Materializer::new(RelationshipStore::new(db));

    assert_eq!(m.register_cooccurrence(&[2, 1, 2, 1], 5, t0()).await.unwrap(), 1);
    assert_eq!(m.edge_between(1, 2).await.unwrap().unwrap().weight, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_events_on_the_same_pair_are_all_counted() {
    let (_tmp, db) = open_db();
    let m = Materializer::new(RelationshipStore::new(db));

    let mut handles = Vec::new();
    for event in 0..16i64 {
        let m = m.clone();
        handles.push(tokio::spawn(async move {
            m.register_cooccurrence(&[1, 2, 3], 1000 + event, t0() + Duration::minutes(event)).await
        }));
    }
    for h in handles {
        h.await.expect("join").expect("register");
    }

    for (x, y) in [(1, 2), (1, 3), (2, 3)] {
        assert_eq!(m.edge_between(x, y).await.unwrap().unwrap().weight, 16);
    }
}

#[tokio::test]
async fn edges_for_orders_by_weight_then_recency() {
    let (_tmp, db) = open_db();
    let m = Materializer::new(RelationshipStore::new(db));

    m.register_cooccurrence(&[1, 2], 1, t0()).await.unwrap();
    m.register_cooccurrence(&[1, 2], 2, t0()).await.unwrap();
    m.register_cooccurrence(&[1, 3], 3, t0()).await.unwrap();
    m.register_cooccurrence(&[1, 4], 4, t1()).await.unwrap();
    m.register_cooccurrence(&[5, 6], 5, t1()).await.unwrap();

    let edges = m.edges_for(1).await.unwrap();
    let others: Vec<i64> = edges.iter().filter_map(|e| e.counterpart(1)).collect();
    assert_eq!(others, vec![2, 4, 3]);
    assert!(m.edges_for(99).await.unwrap().is_empty());
}

// ── Encounter ingestion ──────────────────────────────────────────────────────

#[tokio::test]
async fn recording_an_encounter_links_its_persons() {
    let (_tmp, db) = open_db();
    let encounters = EncounterStore::new(db.clone());
    let m = Materializer::new(RelationshipStore::new(db));

    let a = encounters.add_person(1, "Ana").unwrap();
    let b = encounters.add_person(1, "Bruno").unwrap();
    let c = encounters.add_person(1, "Carla").unwrap();

    let enc = ingest::record_encounter(
        &encounters,
        NewEncounter {
            tenant_id: 1,
            notes: Some("Três abordados juntos".into()),
            occurred_at: t0(),
            person_ids: vec![a.id, b.id, c.id],
            vehicle_ids: vec![],
        },
    )
    .await
    .unwrap();

    let edge = m.edge_between(a.id, c.id).await.unwrap().unwrap();
    assert_eq!(edge.first_event_id, enc.id);
    assert_eq!(m.edges_for(b.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn encounter_with_foreign_person_records_nothing() {
    let (_tmp, db) = open_db();
    let encounters = EncounterStore::new(db.clone());
    let store = RelationshipStore::new(db);

    let mine = encounters.add_person(1, "Ana").unwrap();
    let theirs = encounters.add_person(2, "Zé").unwrap();

    let err = ingest::record_encounter(
        &encounters,
        NewEncounter {
            tenant_id: 1,
            notes: None,
            occurred_at: t0(),
            person_ids: vec![mine.id, theirs.id],
            vehicle_ids: vec![],
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(store.count().unwrap(), 0);
}

#[tokio::test]
async fn failed_edge_write_leaves_no_encounter_behind() {
    let (tmp, db) = open_db();
    let encounters = EncounterStore::new(db);

    let a = encounters.add_person(1, "Ana").unwrap();
    let b = encounters.add_person(1, "Bruno").unwrap();
    rusqlite::Connection::open(tmp.path().join("argus.db"))
        .unwrap()
        .execute_batch("DROP TABLE relationships")
        .unwrap();

    let err = ingest::record_encounter(
        &encounters,
        NewEncounter {
            tenant_id: 1,
            notes: Some("Dupla abordada".into()),
            occurred_at: t0(),
            person_ids: vec![a.id, b.id],
            vehicle_ids: vec![],
        },
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AppError::Storage(_)));
    assert_eq!(encounters.counts().unwrap().0, 0);
}
