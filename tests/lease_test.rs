//! Integration tests for the lease manager against the in-memory store.

use std::collections::HashSet;
use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use surveyq::clock::{Clock, ManualClock};
use surveyq::config::{EnginePolicy, PriorityMap};
use surveyq::engine::Engine;
use surveyq::error::Error;
use surveyq::model::*;
use surveyq::store::{MemoryStore, WorkStore};

const SURVEY: &str = "survey-1";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn test_engine_with(policy: EnginePolicy) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = Engine::new(Arc::new(MemoryStore::new()), policy).with_clock(clock.clone());
    (engine, clock)
}

fn test_engine() -> (Engine, Arc<ManualClock>) {
    test_engine_with(EnginePolicy::default())
}

async fn contact(engine: &Engine, ac: &str, priority: i32, minutes_ago: i64) -> WorkItemId {
    engine
        .ingest_contact(
            NewQueueEntry::new(SURVEY, "9876543210", ac)
                .priority(priority)
                .created_at(t0() - TimeDelta::minutes(minutes_ago)),
        )
        .await
        .unwrap()
        .id
}

async fn request(engine: &Engine, worker: &str) -> Option<WorkItemId> {
    engine
        .request_work(worker, Domain::Call, SURVEY)
        .await
        .unwrap()
        .map(|g| g.work_item_id)
}

fn lease_secs() -> i64 {
    EnginePolicy::default().call_lease_secs as i64
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fifo_within_a_priority_tier() {
    let (engine, _clock) = test_engine();
    let a = contact(&engine, "AC-1", 0, 2).await;
    let b = contact(&engine, "AC-1", 0, 1).await;

    assert_eq!(request(&engine, "caller-1").await, Some(a));
    assert_eq!(request(&engine, "caller-1").await, Some(b));
    assert_eq!(request(&engine, "caller-1").await, None);
}

#[tokio::test]
async fn higher_priority_wins_over_age() {
    let (engine, _clock) = test_engine();
    let old_low = contact(&engine, "AC-1", 0, 60).await;
    let new_high = contact(&engine, "AC-1", 5, 1).await;

    assert_eq!(request(&engine, "caller-1").await, Some(new_high));
    assert_eq!(request(&engine, "caller-2").await, Some(old_low));
}

#[tokio::test]
async fn ac_priority_map_overrides_entry_priority() {
    let clock = Arc::new(ManualClock::new(t0()));
    let mut priorities = PriorityMap::default();
    priorities.insert("AC-2", 10);
    let engine = Engine::new(Arc::new(MemoryStore::new()), EnginePolicy::default())
        .with_clock(clock)
        .with_priorities(priorities);

    let _old = contact(&engine, "AC-1", 1, 60).await;
    let boosted = contact(&engine, "AC-2", 0, 1).await;

    assert_eq!(request(&engine, "caller-1").await, Some(boosted));
}

// ---------------------------------------------------------------------------
// Partition restriction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restricted_worker_only_sees_assigned_partition() {
    let (engine, _clock) = test_engine();
    let other = contact(&engine, "AC-2", 9, 5).await;
    let mine = contact(&engine, "AC-1", 0, 1).await;
    engine
        .set_partitions("caller-1", SURVEY, Domain::Call, ["AC-1"])
        .await
        .unwrap();

    assert_eq!(request(&engine, "caller-1").await, Some(mine));
    assert_eq!(request(&engine, "caller-1").await, None);

    // An unrestricted worker still gets the other AC.
    assert_eq!(request(&engine, "caller-2").await, Some(other));
}

#[tokio::test]
async fn empty_partition_set_is_wildcard_by_default() {
    let (engine, _clock) = test_engine();
    let item = contact(&engine, "AC-7", 0, 1).await;
    engine
        .set_partitions("caller-1", SURVEY, Domain::Call, Vec::<String>::new())
        .await
        .unwrap();

    assert_eq!(request(&engine, "caller-1").await, Some(item));
}

#[tokio::test]
async fn empty_partition_set_gets_nothing_when_wildcard_disabled() {
    let policy = EnginePolicy {
        allow_unrestricted_when_empty: false,
        ..EnginePolicy::default()
    };
    let (engine, _clock) = test_engine_with(policy);
    contact(&engine, "AC-7", 0, 1).await;

    // No assignment row at all counts as an empty set.
    assert_eq!(request(&engine, "caller-1").await, None);

    engine
        .set_partitions("caller-1", SURVEY, Domain::Call, ["AC-7"])
        .await
        .unwrap();
    assert!(request(&engine, "caller-1").await.is_some());
}

// ---------------------------------------------------------------------------
// Release, extend, expiry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_by_non_holder_is_a_no_op() {
    let (engine, _clock) = test_engine();
    let id = contact(&engine, "AC-1", 0, 1).await;
    assert_eq!(request(&engine, "caller-1").await, Some(id));

    assert!(!engine.release_lease(Domain::Call, id, "caller-2").await.unwrap());
    assert_eq!(request(&engine, "caller-2").await, None);

    assert!(engine.release_lease(Domain::Call, id, "caller-1").await.unwrap());
    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.status, CallStatus::Pending);
    assert_eq!(request(&engine, "caller-2").await, Some(id));
}

#[tokio::test]
async fn extend_lease_requires_live_holder() {
    let (engine, clock) = test_engine();
    let id = contact(&engine, "AC-1", 0, 1).await;
    request(&engine, "caller-1").await.unwrap();

    clock.advance(TimeDelta::minutes(20));
    let grant = engine
        .extend_lease(Domain::Call, id, "caller-1")
        .await
        .unwrap();
    assert_eq!(grant.expires_at, clock.now() + TimeDelta::seconds(lease_secs()));

    let err = engine
        .extend_lease(Domain::Call, id, "caller-2")
        .await
        .unwrap_err();
    match err {
        Error::LeaseConflict { holder, .. } => assert_eq!(holder.as_deref(), Some("caller-1")),
        other => panic!("expected LeaseConflict, got {other:?}"),
    }

    // 20 minutes after the original expiry the extended lease still holds.
    clock.advance(TimeDelta::minutes(20));
    assert_eq!(request(&engine, "caller-2").await, None);
}

#[tokio::test]
async fn lapsed_lease_is_recoverable_before_the_sweep() {
    let (engine, clock) = test_engine();
    let id = contact(&engine, "AC-1", 0, 1).await;
    assert_eq!(request(&engine, "caller-1").await, Some(id));

    // Still live exactly at expiry.
    clock.advance(TimeDelta::seconds(lease_secs()));
    assert_eq!(request(&engine, "caller-2").await, None);

    clock.advance(TimeDelta::seconds(1));
    assert_eq!(request(&engine, "caller-2").await, Some(id));

    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.assigned_to.as_deref(), Some("caller-2"));

    // The old holder has lost it.
    assert!(!engine.release_lease(Domain::Call, id, "caller-1").await.unwrap());
}

#[tokio::test]
async fn reclaim_is_idempotent() {
    let (engine, clock) = test_engine();
    let id = contact(&engine, "AC-1", 0, 1).await;
    request(&engine, "caller-1").await.unwrap();

    clock.advance(TimeDelta::seconds(lease_secs() + 1));
    let first = engine.reclaim_expired().await.unwrap();
    assert_eq!(first.reclaimed, vec![WorkRef::new(Domain::Call, id)]);
    assert_eq!(first.view_rows_expired, 1);

    let second = engine.reclaim_expired().await.unwrap();
    assert!(second.reclaimed.is_empty());
    assert_eq!(second.view_rows_expired, 0);

    let rows = engine.store().list_view(Domain::Call, Some(SURVEY)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ViewStatus::Available);
}

#[tokio::test]
async fn reclaim_leaves_live_leases_alone() {
    let (engine, clock) = test_engine();
    contact(&engine, "AC-1", 0, 1).await;
    request(&engine, "caller-1").await.unwrap();

    clock.advance(TimeDelta::minutes(5));
    let report = engine.reclaim_expired().await.unwrap();
    assert!(report.reclaimed.is_empty());
}

// ---------------------------------------------------------------------------
// Exclusivity under concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_never_share_an_item() {
    let (engine, _clock) = test_engine();
    let engine = Arc::new(engine);
    let mut ids = HashSet::new();
    for i in 0..20 {
        ids.insert(contact(&engine, "AC-1", 0, 100 - i).await);
    }

    let mut handles = Vec::new();
    for w in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let worker = format!("caller-{w}");
            let mut got = Vec::new();
            while let Some(grant) = engine
                .request_work(&worker, Domain::Call, SURVEY)
                .await
                .unwrap()
            {
                got.push(grant.work_item_id);
            }
            got
        }));
    }

    let mut granted = Vec::new();
    for handle in handles {
        granted.extend(handle.await.unwrap());
    }
    // A worker may give up after losing every candidate race; drain the rest.
    while let Some(id) = request(&engine, "drain").await {
        granted.push(id);
    }

    let unique: HashSet<_> = granted.iter().copied().collect();
    assert_eq!(unique.len(), granted.len(), "an item was leased twice");
    assert_eq!(unique, ids);
}

// ---------------------------------------------------------------------------
// View membership and admin override
// ---------------------------------------------------------------------------

fn durable_audio() -> AudioRecording {
    AudioRecording {
        has_audio: true,
        file_size: Some(64_000),
        uploaded_at: Some(t0()),
        storage_key: Some("audio/interviews/survey-1/r.webm".to_string()),
        duration_secs: Some(240),
    }
}

#[tokio::test]
async fn view_row_exists_only_while_listed() {
    let (engine, _clock) = test_engine();
    let silent = engine
        .ingest_response(
            NewSurveyResponse::new(SURVEY, "int-1", InterviewMode::Capi).answers(10),
        )
        .await
        .unwrap();
    let good = engine
        .ingest_response(
            NewSurveyResponse::new(SURVEY, "int-1", InterviewMode::Capi)
                .audio(durable_audio())
                .answers(10),
        )
        .await
        .unwrap();

    let rows = engine.store().list_view(Domain::Review, Some(SURVEY)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].work_item_id, good.id);
    assert_eq!(rows[0].status, ViewStatus::Available);
    assert!(rows.iter().all(|r| r.work_item_id != silent.id));

    engine
        .request_work("reviewer-1", Domain::Review, SURVEY)
        .await
        .unwrap()
        .unwrap();
    let rows = engine.store().list_view(Domain::Review, Some(SURVEY)).await.unwrap();
    assert_eq!(rows[0].status, ViewStatus::Assigned);

    // A full rebuild produces the same rows.
    assert_eq!(engine.rebuild_view(Domain::Review, Some(SURVEY)).await.unwrap(), 1);
    let rebuilt = engine.store().list_view(Domain::Review, Some(SURVEY)).await.unwrap();
    assert_eq!(rebuilt, rows);
}

#[tokio::test]
async fn force_assign_respects_eligibility_and_exclusivity() {
    let (engine, _clock) = test_engine();
    let silent = engine
        .ingest_response(
            NewSurveyResponse::new(SURVEY, "int-1", InterviewMode::Capi).answers(10),
        )
        .await
        .unwrap();
    let err = engine
        .force_assign(Domain::Review, silent.id, "reviewer-1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EligibilityViolation { .. }));

    let id = contact(&engine, "AC-1", 0, 1).await;
    engine
        .force_assign(Domain::Call, id, "caller-1")
        .await
        .unwrap();
    let err = engine
        .force_assign(Domain::Call, id, "caller-2")
        .await
        .unwrap_err();
    match err {
        Error::LeaseConflict { holder, .. } => assert_eq!(holder.as_deref(), Some("caller-1")),
        other => panic!("expected LeaseConflict, got {other:?}"),
    }
    assert_eq!(request(&engine, "caller-2").await, None);
}

/// Log sink for asserting on emitted events.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn rejected_force_assign_is_logged() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let (engine, _clock) = test_engine();
    let silent = engine
        .ingest_response(
            NewSurveyResponse::new(SURVEY, "int-1", InterviewMode::Capi).answers(10),
        )
        .await
        .unwrap();
    let err = engine
        .force_assign(Domain::Review, silent.id, "reviewer-9")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EligibilityViolation { .. }));

    let out = logs.contents();
    assert!(out.contains("WARN"), "{out}");
    assert!(out.contains("force-assign rejected"), "{out}");
    assert!(out.contains("reviewer-9"), "{out}");
    assert!(out.contains(&silent.id.to_string()), "{out}");
}

#[tokio::test]
async fn contact_without_phone_is_rejected_at_ingest() {
    let (engine, _clock) = test_engine();
    let err = engine
        .ingest_contact(NewQueueEntry::new(SURVEY, "", "AC-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(request(&engine, "caller-1").await, None);
}
