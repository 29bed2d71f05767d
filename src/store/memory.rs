//! In-process [`WorkStore`] behind a single mutex.
//!
//! Each trait method takes the lock once and never awaits while holding it,
//! so every conditional update is atomic with respect to every other.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::WorkStore;
use crate::error::{Error, Result};
use crate::model::*;
use crate::provider::ProviderEvent;

type PartitionKey = (String, String, Domain);

#[derive(Default)]
struct Tables {
    responses: HashMap<WorkItemId, SurveyResponse>,
    queue: HashMap<WorkItemId, RespondentQueueEntry>,
    calls: HashMap<String, CatiCall>,
    partitions: HashMap<PartitionKey, PartitionAssignment>,
    view: BTreeMap<WorkRef, AvailableAssignment>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn partition_key(worker_id: &str, survey_id: &str, domain: Domain) -> PartitionKey {
    (worker_id.to_string(), survey_id.to_string(), domain)
}

fn clear_call_lease(entry: &mut RespondentQueueEntry) {
    entry.assigned_to = None;
    entry.assigned_at = None;
    entry.lease_expires_at = None;
}

/// assigned/calling -> pending, dropping the lease.
fn return_to_pending(entry: &mut RespondentQueueEntry, now: DateTime<Utc>) {
    entry.status = CallStatus::Pending;
    clear_call_lease(entry);
    entry.updated_at = now;
}

#[async_trait]
impl WorkStore for MemoryStore {
    async fn insert_response(&self, response: &SurveyResponse) -> Result<()> {
        self.lock().responses.insert(response.id, response.clone());
        Ok(())
    }

    async fn get_response(&self, id: WorkItemId) -> Result<SurveyResponse> {
        self.lock()
            .responses
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("survey response {id}")))
    }

    async fn list_pending_responses(&self, survey_id: Option<&str>) -> Result<Vec<SurveyResponse>> {
        let tables = self.lock();
        let mut out: Vec<_> = tables
            .responses
            .values()
            .filter(|r| r.status == ReviewStatus::PendingApproval)
            .filter(|r| survey_id.is_none_or(|s| r.survey_id == s))
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.created_at, r.id));
        Ok(out)
    }

    async fn set_qc_batch(
        &self,
        id: WorkItemId,
        batch_id: Option<&str>,
        is_sample: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.lock();
        let response = tables
            .responses
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("survey response {id}")))?;
        response.qc_batch_id = batch_id.map(str::to_string);
        response.is_sample = is_sample;
        response.updated_at = now;
        Ok(())
    }

    async fn record_decision(
        &self,
        id: WorkItemId,
        reviewer_id: &str,
        status: ReviewStatus,
        verification: &Verification,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.lock();
        let Some(response) = tables.responses.get_mut(&id) else {
            return Ok(false);
        };
        let held = response
            .lease
            .as_ref()
            .is_some_and(|l| l.is_held_by(reviewer_id, now));
        if !held || response.status != ReviewStatus::PendingApproval {
            return Ok(false);
        }
        response.status = status;
        response.verification = Some(verification.clone());
        response.lease = None;
        response.updated_at = now;
        Ok(true)
    }

    async fn insert_queue_entry(&self, entry: &RespondentQueueEntry) -> Result<()> {
        self.lock().queue.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn get_queue_entry(&self, id: WorkItemId) -> Result<RespondentQueueEntry> {
        self.lock()
            .queue
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("queue entry {id}")))
    }

    async fn list_open_queue_entries(&self, survey_id: Option<&str>) -> Result<Vec<RespondentQueueEntry>> {
        let tables = self.lock();
        let mut out: Vec<_> = tables
            .queue
            .values()
            .filter(|e| !e.status.is_terminal())
            .filter(|e| survey_id.is_none_or(|s| e.survey_id == s))
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.created_at, e.id));
        Ok(out)
    }

    async fn mark_calling(
        &self,
        id: WorkItemId,
        worker_id: &str,
        lease_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.lock();
        let Some(entry) = tables.queue.get_mut(&id) else {
            return Ok(false);
        };
        if !entry.status.can_transition_to(CallStatus::Calling)
            || !entry.is_leased_by(worker_id, now)
        {
            return Ok(false);
        }
        entry.status = CallStatus::Calling;
        entry.lease_expires_at = Some(lease_expires_at);
        entry.updated_at = now;
        Ok(true)
    }

    async fn apply_call_attempt(
        &self,
        id: WorkItemId,
        worker_id: &str,
        attempt: &CallAttempt,
        disposition: &CallDisposition,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.lock();
        let Some(entry) = tables.queue.get_mut(&id) else {
            return Ok(false);
        };
        if !entry.is_leased_by(worker_id, now)
            || !entry.status.can_transition_to(disposition.target_status())
            || entry.current_attempt_number + 1 != attempt.attempt_number
        {
            return Ok(false);
        }
        entry.call_attempts.push(attempt.clone());
        entry.current_attempt_number = attempt.attempt_number;
        entry.last_attempted_at = Some(attempt.attempted_at);
        entry.status = disposition.target_status();
        if let CallDisposition::Abandoned { reason, notes } = disposition {
            entry.abandonment_reason = Some(reason.clone());
            entry.abandonment_notes = notes.clone();
        }
        clear_call_lease(entry);
        entry.updated_at = now;
        Ok(true)
    }

    async fn try_acquire_lease(
        &self,
        work: WorkRef,
        worker_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.lock();
        match work.domain {
            Domain::Review => {
                let Some(response) = tables.responses.get_mut(&work.id) else {
                    return Ok(false);
                };
                let free = response.lease.as_ref().is_none_or(|l| !l.is_live(now));
                if response.status != ReviewStatus::PendingApproval || !free {
                    return Ok(false);
                }
                response.lease = Some(Lease {
                    holder: worker_id.to_string(),
                    assigned_at: now,
                    expires_at,
                });
                response.updated_at = now;
            }
            Domain::Call => {
                let Some(entry) = tables.queue.get_mut(&work.id) else {
                    return Ok(false);
                };
                if entry.lease_lapsed(now) {
                    return_to_pending(entry, now);
                }
                if !entry.status.can_transition_to(CallStatus::Assigned) {
                    return Ok(false);
                }
                entry.status = CallStatus::Assigned;
                entry.assigned_to = Some(worker_id.to_string());
                entry.assigned_at = Some(now);
                entry.lease_expires_at = Some(expires_at);
                entry.updated_at = now;
            }
        }
        Ok(true)
    }

    async fn extend_lease(
        &self,
        work: WorkRef,
        worker_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.lock();
        match work.domain {
            Domain::Review => {
                let Some(response) = tables.responses.get_mut(&work.id) else {
                    return Ok(false);
                };
                match response.lease.as_mut() {
                    Some(lease) if lease.is_held_by(worker_id, now) => {
                        lease.expires_at = expires_at;
                        response.updated_at = now;
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
            Domain::Call => {
                let Some(entry) = tables.queue.get_mut(&work.id) else {
                    return Ok(false);
                };
                if !entry.is_leased_by(worker_id, now) {
                    return Ok(false);
                }
                entry.lease_expires_at = Some(expires_at);
                entry.updated_at = now;
                Ok(true)
            }
        }
    }

    async fn release_lease(&self, work: WorkRef, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.lock();
        match work.domain {
            Domain::Review => {
                let Some(response) = tables.responses.get_mut(&work.id) else {
                    return Ok(false);
                };
                if response.lease.as_ref().is_none_or(|l| l.holder != worker_id) {
                    return Ok(false);
                }
                response.lease = None;
                response.updated_at = now;
            }
            Domain::Call => {
                let Some(entry) = tables.queue.get_mut(&work.id) else {
                    return Ok(false);
                };
                let held = entry.status.can_transition_to(CallStatus::Pending)
                    && entry.assigned_to.as_deref() == Some(worker_id);
                if !held {
                    return Ok(false);
                }
                return_to_pending(entry, now);
            }
        }
        Ok(true)
    }

    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<WorkRef>> {
        let mut tables = self.lock();
        let mut reclaimed = Vec::new();

        for response in tables.responses.values_mut() {
            if response.lease.as_ref().is_some_and(|l| !l.is_live(now)) {
                response.lease = None;
                response.updated_at = now;
                reclaimed.push(WorkRef::new(Domain::Review, response.id));
            }
        }
        for entry in tables.queue.values_mut() {
            if entry.lease_lapsed(now) {
                return_to_pending(entry, now);
                reclaimed.push(WorkRef::new(Domain::Call, entry.id));
            }
        }

        reclaimed.sort();
        Ok(reclaimed)
    }

    async fn insert_call_record(&self, call: &CatiCall) -> Result<()> {
        let mut tables = self.lock();
        if tables.calls.contains_key(&call.provider_call_id) {
            return Err(Error::InvalidInput(format!(
                "call {} already recorded",
                call.provider_call_id
            )));
        }
        tables.calls.insert(call.provider_call_id.clone(), call.clone());
        Ok(())
    }

    async fn get_call_record(&self, provider_call_id: &str) -> Result<Option<CatiCall>> {
        Ok(self.lock().calls.get(provider_call_id).cloned())
    }

    async fn update_provider_status(&self, event: &ProviderEvent) -> Result<bool> {
        let mut tables = self.lock();
        let Some(call) = tables.calls.get_mut(&event.provider_call_id) else {
            return Ok(false);
        };
        call.provider_status = Some(event.status);
        call.webhook_received_at = Some(event.received_at);
        if let Some(from) = &event.from_number {
            call.from_number = Some(from.clone());
        }
        if let Some(to) = &event.to_number {
            call.to_number = to.clone();
        }
        if event.duration_secs.is_some() {
            call.duration_secs = event.duration_secs;
        }
        if let Some(url) = event.recording_url.as_deref()
            && call.recording_url.as_deref() != Some(url)
        {
            call.recording_url = Some(url.to_string());
            call.upload.status = Some(UploadStatus::Pending);
            call.upload.error = None;
        }
        call.updated_at = event.received_at;
        Ok(true)
    }

    async fn list_uploads_due(&self, max_attempts: u32, limit: usize) -> Result<Vec<CatiCall>> {
        let tables = self.lock();
        let mut due: Vec<_> = tables
            .calls
            .values()
            .filter(|c| c.recording_url.is_some())
            .filter(|c| c.upload.status.is_some_and(UploadStatus::is_retryable))
            .filter(|c| c.upload.attempts < max_attempts)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.provider_call_id.cmp(&b.provider_call_id))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn set_upload_state(
        &self,
        provider_call_id: &str,
        upload: &RecordingUpload,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.lock();
        let call = tables
            .calls
            .get_mut(provider_call_id)
            .ok_or_else(|| Error::NotFound(format!("call {provider_call_id}")))?;
        call.upload = upload.clone();
        call.updated_at = now;
        Ok(())
    }

    async fn get_partitions(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
    ) -> Result<Option<PartitionAssignment>> {
        Ok(self
            .lock()
            .partitions
            .get(&partition_key(worker_id, survey_id, domain))
            .cloned())
    }

    async fn replace_partitions(&self, assignment: &PartitionAssignment) -> Result<()> {
        let key = partition_key(&assignment.worker_id, &assignment.survey_id, assignment.domain);
        self.lock().partitions.insert(key, assignment.clone());
        Ok(())
    }

    async fn remove_partition(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
        partition: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.lock();
        let Some(row) = tables
            .partitions
            .get_mut(&partition_key(worker_id, survey_id, domain))
        else {
            return Ok(false);
        };
        let removed = row.partitions.remove(partition);
        if removed {
            row.updated_at = now;
        }
        Ok(removed)
    }

    async fn delete_partitions(&self, worker_id: &str, survey_id: &str, domain: Domain) -> Result<bool> {
        Ok(self
            .lock()
            .partitions
            .remove(&partition_key(worker_id, survey_id, domain))
            .is_some())
    }

    async fn accept_partitions(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.lock();
        let Some(row) = tables
            .partitions
            .get_mut(&partition_key(worker_id, survey_id, domain))
        else {
            return Ok(false);
        };
        row.status = AssignmentStatus::Accepted;
        row.updated_at = now;
        Ok(true)
    }

    async fn upsert_view_row(&self, row: &AvailableAssignment) -> Result<()> {
        self.lock().view.insert(row.work_ref(), row.clone());
        Ok(())
    }

    async fn delete_view_row(&self, work: WorkRef) -> Result<()> {
        self.lock().view.remove(&work);
        Ok(())
    }

    async fn view_candidates(&self, query: &CandidateQuery) -> Result<Vec<AvailableAssignment>> {
        if query.partitions == PartitionFilter::Nothing {
            return Ok(Vec::new());
        }
        let tables = self.lock();
        let mut rows: Vec<_> = tables
            .view
            .values()
            .filter(|r| r.domain == query.domain && r.survey_id == query.survey_id)
            .filter(|r| query.partitions.admits(r.partition_key.as_deref()))
            .filter(|r| r.is_offerable(query.now))
            .cloned()
            .collect();
        rows.sort_by(rank_order);
        rows.truncate(query.limit);
        Ok(rows)
    }

    async fn list_view(&self, domain: Domain, survey_id: Option<&str>) -> Result<Vec<AvailableAssignment>> {
        let tables = self.lock();
        let mut rows: Vec<_> = tables
            .view
            .values()
            .filter(|r| r.domain == domain)
            .filter(|r| survey_id.is_none_or(|s| r.survey_id == s))
            .cloned()
            .collect();
        rows.sort_by(rank_order);
        Ok(rows)
    }

    async fn replace_view(
        &self,
        domain: Domain,
        survey_id: Option<&str>,
        rows: &[AvailableAssignment],
    ) -> Result<()> {
        let mut tables = self.lock();
        tables
            .view
            .retain(|_, r| r.domain != domain || survey_id.is_some_and(|s| r.survey_id != s));
        for row in rows {
            tables.view.insert(row.work_ref(), row.clone());
        }
        Ok(())
    }

    async fn mark_expired_view_rows(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.lock();
        let mut marked = 0;
        for row in tables.view.values_mut() {
            let lapsed = row.lease_expires_at.is_some_and(|at| now > at);
            if row.status == ViewStatus::Assigned && lapsed {
                row.status = ViewStatus::Expired;
                marked += 1;
            }
        }
        Ok(marked)
    }
}
