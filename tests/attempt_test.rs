//! Integration tests for the call state machine, provider webhooks and
//! recording uploads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use surveyq::clock::ManualClock;
use surveyq::config::EnginePolicy;
use surveyq::engine::{Engine, RecordingFetcher, RecordingSink, UploadReport, WebhookOutcome};
use surveyq::error::{Error, Result};
use surveyq::model::*;
use surveyq::provider::ProviderEvent;
use surveyq::store::{MemoryStore, WorkStore};

const SURVEY: &str = "survey-cati";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 20, 10, 0, 0).unwrap()
}

fn test_engine_with(policy: EnginePolicy) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = Engine::new(Arc::new(MemoryStore::new()), policy).with_clock(clock.clone());
    (engine, clock)
}

fn test_engine() -> (Engine, Arc<ManualClock>) {
    test_engine_with(EnginePolicy::default())
}

async fn queued(engine: &Engine) -> WorkItemId {
    engine
        .ingest_contact(NewQueueEntry::new(SURVEY, "98765 43210", "AC-3").name("R. Sharma"))
        .await
        .unwrap()
        .id
}

async fn lease(engine: &Engine, worker: &str) -> Option<WorkItemId> {
    engine
        .request_work(worker, Domain::Call, SURVEY)
        .await
        .unwrap()
        .map(|g| g.work_item_id)
}

fn webhook(pairs: &[(&str, &str)]) -> ProviderEvent {
    let params: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ProviderEvent::from_params(&params, t0()).unwrap()
}

/// Lease a fresh contact to `worker`, dial it as `call_id`, and deliver an
/// answered webhook carrying `recording_url`.
async fn answered_call(engine: &Engine, worker: &str, call_id: &str, recording_url: &str) {
    let id = queued(engine).await;
    engine.force_assign(Domain::Call, id, worker).await.unwrap();
    engine.start_call(id, worker, call_id, None).await.unwrap();
    let outcome = engine
        .handle_provider_event(&webhook(&[
            ("CallSid", call_id),
            ("Status", "ANSWER"),
            ("CallRecordingUrl", recording_url),
        ]))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::AttemptRecorded(CallDisposition::Completed));
}

// ---------------------------------------------------------------------------
// Attempts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_unanswered_attempts_abandon_the_entry() {
    let (engine, _clock) = test_engine();
    let id = queued(&engine).await;

    for attempt in 1..=3 {
        assert_eq!(lease(&engine, "caller-1").await, Some(id), "attempt {attempt}");
        let disposition = engine
            .record_attempt(id, "caller-1", CallOutcome::NoAnswer, None, None)
            .await
            .unwrap();
        if attempt < 3 {
            assert_eq!(disposition, CallDisposition::Pending);
        } else {
            assert_eq!(
                disposition,
                CallDisposition::Abandoned {
                    reason: ABANDON_MAX_ATTEMPTS.to_string(),
                    notes: None,
                }
            );
        }
    }

    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.status, CallStatus::Abandoned);
    assert_eq!(entry.abandonment_reason.as_deref(), Some(ABANDON_MAX_ATTEMPTS));
    assert_eq!(
        entry.call_attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(entry.current_attempt_number, 3);
    assert!(entry.assigned_to.is_none());

    assert_eq!(lease(&engine, "caller-1").await, None);
    let err = engine
        .record_attempt(id, "caller-1", CallOutcome::NoAnswer, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn answered_call_completes_and_leaves_the_view() {
    let (engine, _clock) = test_engine();
    let id = queued(&engine).await;
    lease(&engine, "caller-1").await.unwrap();

    let disposition = engine
        .record_attempt(id, "caller-1", CallOutcome::Answered, None, Some("interview done".into()))
        .await
        .unwrap();
    assert_eq!(disposition, CallDisposition::Completed);

    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.status, CallStatus::Completed);
    assert_eq!(entry.last_attempted_at, Some(t0()));
    assert!(engine.store().list_view(Domain::Call, Some(SURVEY)).await.unwrap().is_empty());
}

#[tokio::test]
async fn retryable_outcome_returns_entry_to_the_pool() {
    let (engine, _clock) = test_engine();
    let id = queued(&engine).await;
    lease(&engine, "caller-1").await.unwrap();

    engine
        .record_attempt(id, "caller-1", CallOutcome::Busy, None, None)
        .await
        .unwrap();

    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.status, CallStatus::Pending);
    assert!(entry.lease_expires_at.is_none());
    assert_eq!(lease(&engine, "caller-2").await, Some(id));
}

#[tokio::test]
async fn unusable_number_abandons_on_first_attempt() {
    let (engine, _clock) = test_engine();
    let id = queued(&engine).await;
    lease(&engine, "caller-1").await.unwrap();

    let disposition = engine
        .record_attempt(
            id,
            "caller-1",
            CallOutcome::InvalidNumber,
            None,
            Some("number not in service".into()),
        )
        .await
        .unwrap();
    assert_eq!(disposition.target_status(), CallStatus::Abandoned);

    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.abandonment_reason.as_deref(), Some("invalid_number"));
    assert_eq!(entry.abandonment_notes.as_deref(), Some("number not in service"));
}

#[tokio::test]
async fn only_the_holder_records_attempts() {
    let (engine, _clock) = test_engine();
    let id = queued(&engine).await;
    lease(&engine, "caller-1").await.unwrap();

    let err = engine
        .record_attempt(id, "caller-2", CallOutcome::NoAnswer, None, None)
        .await
        .unwrap_err();
    match err {
        Error::LeaseConflict { holder, .. } => assert_eq!(holder.as_deref(), Some("caller-1")),
        other => panic!("expected LeaseConflict, got {other:?}"),
    }
    assert!(engine.store().get_queue_entry(id).await.unwrap().call_attempts.is_empty());
}

#[tokio::test]
async fn start_call_requires_an_assigned_entry_held_by_caller() {
    let (engine, _clock) = test_engine();
    let id = queued(&engine).await;

    let err = engine.start_call(id, "caller-1", "call-x", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    lease(&engine, "caller-1").await.unwrap();
    let err = engine.start_call(id, "caller-2", "call-x", None).await.unwrap_err();
    assert!(matches!(err, Error::LeaseConflict { .. }));

    let call = engine
        .start_call(id, "caller-1", "call-x", Some("08011112222".into()))
        .await
        .unwrap();
    assert_eq!(call.to_number, "9876543210");
    assert_eq!(call.queue_entry_id, id);
    assert_eq!(
        engine.store().get_queue_entry(id).await.unwrap().status,
        CallStatus::Calling
    );
}

#[tokio::test]
async fn dialling_restarts_the_lease() {
    let (engine, clock) = test_engine();
    let id = queued(&engine).await;
    lease(&engine, "caller-1").await.unwrap();

    clock.advance(TimeDelta::minutes(20));
    engine.start_call(id, "caller-1", "call-1", None).await.unwrap();

    // 40 minutes after the lease, 20 after the dial.
    clock.advance(TimeDelta::minutes(20));
    assert!(engine.reclaim_expired().await.unwrap().reclaimed.is_empty());

    clock.advance(TimeDelta::minutes(11));
    let report = engine.reclaim_expired().await.unwrap();
    assert_eq!(report.reclaimed, vec![WorkRef::new(Domain::Call, id)]);
}

#[tokio::test]
async fn stuck_call_is_reclaimed_and_old_holder_locked_out() {
    let (engine, clock) = test_engine();
    let id = queued(&engine).await;
    lease(&engine, "caller-1").await.unwrap();
    engine.start_call(id, "caller-1", "call-1", None).await.unwrap();

    clock.advance(EnginePolicy::default().lease_duration(Domain::Call) + TimeDelta::seconds(1));
    engine.reclaim_expired().await.unwrap();

    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.status, CallStatus::Pending);
    assert!(entry.assigned_to.is_none());

    let err = engine
        .record_attempt(id, "caller-1", CallOutcome::Answered, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LeaseConflict { holder: None, .. }));
    assert_eq!(lease(&engine, "caller-2").await, Some(id));
}

// ---------------------------------------------------------------------------
// Provider webhooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn webhook_for_unknown_call_is_ignored() {
    let (engine, _clock) = test_engine();
    let outcome = engine
        .handle_provider_event(&webhook(&[("CallSid", "nope"), ("Status", "BUSY")]))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::UnknownCall);
}

#[tokio::test]
async fn webhook_records_attempt_once() {
    let (engine, _clock) = test_engine();
    let id = queued(&engine).await;
    lease(&engine, "caller-1").await.unwrap();
    engine.start_call(id, "caller-1", "call-77", None).await.unwrap();

    let event = webhook(&[("Call_Sid", "call-77"), ("Status", "NOANSWER")]);
    let first = engine.handle_provider_event(&event).await.unwrap();
    assert_eq!(first, WebhookOutcome::AttemptRecorded(CallDisposition::Pending));

    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.call_attempts.len(), 1);
    let attempt = &entry.call_attempts[0];
    assert_eq!(attempt.outcome, CallOutcome::NoAnswer);
    assert_eq!(attempt.attempted_by, "caller-1");
    assert_eq!(attempt.provider_call_id.as_deref(), Some("call-77"));
    assert_eq!(attempt.notes.as_deref(), Some("provider status: NOANSWER"));

    // Provider retries the callback.
    let again = engine.handle_provider_event(&event).await.unwrap();
    assert_eq!(again, WebhookOutcome::StatusRecorded);
    assert_eq!(
        engine.store().get_queue_entry(id).await.unwrap().call_attempts.len(),
        1
    );

    let call = engine.store().get_call_record("call-77").await.unwrap().unwrap();
    assert_eq!(call.provider_status, Some(ProviderStatus::NoAnswer));
    assert_eq!(call.webhook_received_at, Some(t0()));
}

#[tokio::test]
async fn intermediate_webhook_status_keeps_the_call_open() {
    let (engine, _clock) = test_engine();
    let id = queued(&engine).await;
    lease(&engine, "caller-1").await.unwrap();
    engine.start_call(id, "caller-1", "call-ring", None).await.unwrap();

    for event in [
        webhook(&[("CallSid", "call-ring"), ("Status", "ringing")]),
        webhook(&[("CallSid", "call-ring"), ("Status", "in-progress")]),
        webhook(&[("CallSid", "call-ring")]),
    ] {
        let outcome = engine.handle_provider_event(&event).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::StatusRecorded, "{:?}", event.raw_status);
    }

    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.status, CallStatus::Calling);
    assert!(entry.call_attempts.is_empty());
    assert!(entry.is_leased_by("caller-1", t0()));

    let call = engine.store().get_call_record("call-ring").await.unwrap().unwrap();
    assert_eq!(call.provider_status, Some(ProviderStatus::Completed));

    // The final status still settles the attempt.
    let outcome = engine
        .handle_provider_event(&webhook(&[("CallSid", "call-ring"), ("Status", "BUSY")]))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::AttemptRecorded(CallDisposition::Pending));
    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.call_attempts.len(), 1);
    assert_eq!(entry.call_attempts[0].outcome, CallOutcome::Busy);
}

#[tokio::test]
async fn webhook_numbers_and_duration_land_on_the_call_record() {
    let (engine, _clock) = test_engine();
    let id = queued(&engine).await;
    lease(&engine, "caller-1").await.unwrap();
    engine
        .start_call(id, "caller-1", "call-88", Some("08011112222".into()))
        .await
        .unwrap();

    engine
        .handle_provider_event(&webhook(&[
            ("CallSid", "call-88"),
            ("Status", "ANSWER"),
            ("Call Duration", "187"),
            ("Dial Whom Number", "08099990000"),
        ]))
        .await
        .unwrap();

    let call = engine.store().get_call_record("call-88").await.unwrap().unwrap();
    assert_eq!(call.duration_secs, Some(187));
    assert_eq!(call.from_number.as_deref(), Some("08099990000"));
    // Not in the callback, so the dialled number stays.
    assert_eq!(call.to_number, "9876543210");
    assert_eq!(call.provider_status, Some(ProviderStatus::Answered));
}

#[tokio::test]
async fn late_webhook_after_reclaim_only_stores_status() {
    let (engine, clock) = test_engine();
    let id = queued(&engine).await;
    lease(&engine, "caller-1").await.unwrap();
    engine.start_call(id, "caller-1", "call-late", None).await.unwrap();

    clock.advance(TimeDelta::hours(2));
    engine.reclaim_expired().await.unwrap();

    let outcome = engine
        .handle_provider_event(&webhook(&[("CallSid", "call-late"), ("Status", "ANSWER")]))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::StatusRecorded);

    let entry = engine.store().get_queue_entry(id).await.unwrap();
    assert_eq!(entry.status, CallStatus::Pending);
    assert!(entry.call_attempts.is_empty());
}

// ---------------------------------------------------------------------------
// Recording uploads
// ---------------------------------------------------------------------------

enum Canned {
    Bytes(Vec<u8>),
    Gone,
    Fail(String),
}

#[derive(Default)]
struct FakeFetcher {
    responses: Mutex<HashMap<String, Canned>>,
}

impl FakeFetcher {
    fn with(self, url: &str, canned: Canned) -> Self {
        self.responses.lock().unwrap().insert(url.to_string(), canned);
        self
    }
}

#[async_trait]
impl RecordingFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        match self.responses.lock().unwrap().get(url) {
            Some(Canned::Bytes(b)) => Ok(b.clone()),
            Some(Canned::Gone) => Err(Error::RecordingUnavailable(format!("{url} returned 404"))),
            Some(Canned::Fail(msg)) => Err(Error::UpstreamProvider(msg.clone())),
            None => Err(Error::UpstreamProvider(format!("no canned response for {url}"))),
        }
    }
}

#[derive(Default)]
struct FakeSink {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl RecordingSink for FakeSink {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[tokio::test]
async fn recording_is_uploaded_once() {
    let (engine, _clock) = test_engine();
    let url = "https://rec.example.com/call-ok.mp3";
    answered_call(&engine, "caller-1", "call-ok", url).await;

    let fetcher = FakeFetcher::default().with(url, Canned::Bytes(b"ID3audio".to_vec()));
    let sink = FakeSink::default();

    let report = engine.process_recording_uploads(&fetcher, &sink).await.unwrap();
    assert_eq!(report.uploaded, 1);

    let call = engine.store().get_call_record("call-ok").await.unwrap().unwrap();
    assert_eq!(call.upload.status, Some(UploadStatus::Uploaded));
    assert_eq!(call.upload.storage_key.as_deref(), Some("audio/cati/call-ok.mp3"));
    assert_eq!(call.upload.attempts, 1);
    assert_eq!(
        sink.objects.lock().unwrap().get("audio/cati/call-ok.mp3").map(Vec::as_slice),
        Some(&b"ID3audio"[..])
    );

    let again = engine.process_recording_uploads(&fetcher, &sink).await.unwrap();
    assert_eq!(again, UploadReport::default());
}

#[tokio::test]
async fn recording_gone_at_provider_is_marked_deleted() {
    let (engine, _clock) = test_engine();
    let url = "https://rec.example.com/gone.mp3";
    answered_call(&engine, "caller-1", "call-gone", url).await;

    let fetcher = FakeFetcher::default().with(url, Canned::Gone);
    let sink = FakeSink::default();
    let report = engine.process_recording_uploads(&fetcher, &sink).await.unwrap();
    assert_eq!(report.deleted, 1);

    let call = engine.store().get_call_record("call-gone").await.unwrap().unwrap();
    assert_eq!(call.upload.status, Some(UploadStatus::Deleted));
    assert_eq!(
        call.upload.error.as_deref(),
        Some("recording no longer available at provider")
    );
    assert_eq!(
        engine.process_recording_uploads(&fetcher, &sink).await.unwrap(),
        UploadReport::default()
    );

    // A new URL from the provider starts the upload over.
    engine
        .handle_provider_event(&webhook(&[
            ("CallSid", "call-gone"),
            ("Status", "ANSWER"),
            ("CallRecordingUrl", "https://rec.example.com/gone-v2.mp3"),
        ]))
        .await
        .unwrap();
    let call = engine.store().get_call_record("call-gone").await.unwrap().unwrap();
    assert_eq!(call.upload.status, Some(UploadStatus::Pending));
    assert!(call.upload.error.is_none());
}

#[tokio::test]
async fn failed_uploads_retry_until_the_cap() {
    let policy = EnginePolicy {
        max_upload_attempts: 2,
        ..EnginePolicy::default()
    };
    let (engine, _clock) = test_engine_with(policy);
    let url = "https://rec.example.com/flaky.mp3";
    answered_call(&engine, "caller-1", "call-flaky", url).await;

    let fetcher = FakeFetcher::default().with(url, Canned::Fail("x".repeat(800)));
    let sink = FakeSink::default();

    for expected_attempts in 1..=2 {
        let report = engine.process_recording_uploads(&fetcher, &sink).await.unwrap();
        assert_eq!(report.failed, 1);
        let call = engine.store().get_call_record("call-flaky").await.unwrap().unwrap();
        assert_eq!(call.upload.status, Some(UploadStatus::Failed));
        assert_eq!(call.upload.attempts, expected_attempts);
        assert_eq!(call.upload.error.as_ref().map(|e| e.chars().count()), Some(500));
    }

    let report = engine.process_recording_uploads(&fetcher, &sink).await.unwrap();
    assert_eq!(report, UploadReport::default());

    // Upload failures never touch the call outcome.
    let call = engine.store().get_call_record("call-flaky").await.unwrap().unwrap();
    let entry = engine.store().get_queue_entry(call.queue_entry_id).await.unwrap();
    assert_eq!(entry.status, CallStatus::Completed);
}

#[tokio::test]
async fn non_http_recording_url_is_skipped() {
    let (engine, _clock) = test_engine();
    answered_call(&engine, "caller-1", "call-ftp", "ftp://rec.example.com/a.mp3").await;

    let report = engine
        .process_recording_uploads(&FakeFetcher::default(), &FakeSink::default())
        .await
        .unwrap();
    assert_eq!(report.skipped, 1);

    let call = engine.store().get_call_record("call-ftp").await.unwrap().unwrap();
    assert_eq!(call.upload.status, Some(UploadStatus::Failed));
    assert_eq!(call.upload.attempts, 1);
}
