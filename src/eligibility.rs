//! Eligibility filter: the single predicate deciding whether a work item
//! may currently be offered to a worker.
//!
//! Pure functions over the item's attributes. The view builder, the lease
//! manager's re-check and the read-only eligibility report all call these,
//! so the live queue and reports cannot disagree.

use chrono::{DateTime, Utc};

use crate::model::{CallStatus, ReviewStatus, RespondentQueueEntry, SurveyResponse, WorkItem};

/// Storage keys of recordings that reached durable object storage.
pub const DURABLE_AUDIO_PREFIX: &str = "audio/interviews/";

/// Audio-backed responses need at least this many recorded answers.
pub const MIN_RECORDED_ANSWERS: u32 = 3;

/// Why an item cannot be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ineligible {
    /// Review item not in `Pending_Approval`.
    NotPendingApproval,
    /// Call entry already completed or abandoned.
    CallClosed,
    /// Somebody holds a live lease.
    Leased,
    NoAudio,
    EmptyRecording,
    RecordingNotUploaded,
    TransientStorageKey,
    ZeroDuration,
    TooFewAnswers,
    /// Inside a QC sampling batch and not a sampled item.
    InQcBatch,
}

impl Ineligible {
    pub fn as_str(self) -> &'static str {
        match self {
            Ineligible::NotPendingApproval => "not_pending_approval",
            Ineligible::CallClosed => "call_closed",
            Ineligible::Leased => "leased",
            Ineligible::NoAudio => "no_audio",
            Ineligible::EmptyRecording => "empty_recording",
            Ineligible::RecordingNotUploaded => "recording_not_uploaded",
            Ineligible::TransientStorageKey => "transient_storage_key",
            Ineligible::ZeroDuration => "zero_duration",
            Ineligible::TooFewAnswers => "too_few_answers",
            Ineligible::InQcBatch => "in_qc_batch",
        }
    }
}

impl std::fmt::Display for Ineligible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full predicate: listed and not under a live lease. A call entry must be
/// `pending`, reading a lapsed lease as already reclaimed.
pub fn check(item: &WorkItem, now: DateTime<Utc>) -> Result<(), Ineligible> {
    check_listing(item)?;
    let leased = match item {
        WorkItem::Review(_) => item.is_leased(now),
        WorkItem::Call(c) => c.effective_status(now) != CallStatus::Pending,
    };
    if leased {
        return Err(Ineligible::Leased);
    }
    Ok(())
}

pub fn is_eligible(item: &WorkItem, now: DateTime<Utc>) -> bool {
    check(item, now).is_ok()
}

/// Lease-independent part of the predicate. An item that passes belongs in
/// the available-assignment view (as `available` or `assigned`).
pub fn check_listing(item: &WorkItem) -> Result<(), Ineligible> {
    match item {
        WorkItem::Review(r) => check_response(r),
        WorkItem::Call(c) => check_queue_entry(c),
    }
}

pub fn is_listed(item: &WorkItem) -> bool {
    check_listing(item).is_ok()
}

fn check_response(r: &SurveyResponse) -> Result<(), Ineligible> {
    if r.status != ReviewStatus::PendingApproval {
        return Err(Ineligible::NotPendingApproval);
    }

    if r.interview_mode.is_audio_backed() {
        let audio = &r.audio;
        if !audio.has_audio {
            return Err(Ineligible::NoAudio);
        }
        if audio.file_size.is_none_or(|size| size <= 0) {
            return Err(Ineligible::EmptyRecording);
        }
        if audio.uploaded_at.is_none() {
            return Err(Ineligible::RecordingNotUploaded);
        }
        if !audio
            .storage_key
            .as_deref()
            .is_some_and(|key| key.starts_with(DURABLE_AUDIO_PREFIX))
        {
            return Err(Ineligible::TransientStorageKey);
        }
        if audio.duration_secs.is_none_or(|d| d <= 0) {
            return Err(Ineligible::ZeroDuration);
        }
        if r.answer_count < MIN_RECORDED_ANSWERS {
            return Err(Ineligible::TooFewAnswers);
        }
    } else if r.qc_batch_id.is_some() && !r.is_sample {
        return Err(Ineligible::InQcBatch);
    }

    Ok(())
}

fn check_queue_entry(c: &RespondentQueueEntry) -> Result<(), Ineligible> {
    match c.status {
        CallStatus::Completed | CallStatus::Abandoned => Err(Ineligible::CallClosed),
        // assigned/calling entries stay listed; the lease decides whether
        // they are offerable.
        CallStatus::Pending | CallStatus::Assigned | CallStatus::Calling => Ok(()),
    }
}
