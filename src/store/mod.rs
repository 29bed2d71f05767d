//! Storage seam between the engine and durable state.
//!
//! Every method that touches a lease is a single conditional update: it
//! applies only if the precondition still holds at write time and reports
//! whether it did. That compare-and-swap, enforced by the backend, is the
//! only synchronization the engine relies on.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::*;
use crate::provider::ProviderEvent;

#[async_trait]
pub trait WorkStore: Send + Sync {
    // === Review items ===

    async fn insert_response(&self, response: &SurveyResponse) -> Result<()>;

    async fn get_response(&self, id: WorkItemId) -> Result<SurveyResponse>;

    /// Responses still in `Pending_Approval`, optionally for one survey.
    async fn list_pending_responses(&self, survey_id: Option<&str>) -> Result<Vec<SurveyResponse>>;

    /// Move a response into (or out of) a QC sampling batch.
    async fn set_qc_batch(
        &self,
        id: WorkItemId,
        batch_id: Option<&str>,
        is_sample: bool,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Record the terminal decision iff `reviewer_id` holds a live lease
    /// and the response is still `Pending_Approval`. Clears the lease.
    async fn record_decision(
        &self,
        id: WorkItemId,
        reviewer_id: &str,
        status: ReviewStatus,
        verification: &Verification,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // === Call entries ===

    async fn insert_queue_entry(&self, entry: &RespondentQueueEntry) -> Result<()>;

    async fn get_queue_entry(&self, id: WorkItemId) -> Result<RespondentQueueEntry>;

    /// Entries not yet completed or abandoned, optionally for one survey.
    async fn list_open_queue_entries(&self, survey_id: Option<&str>) -> Result<Vec<RespondentQueueEntry>>;

    /// assigned → calling iff `worker_id` holds a live lease. Pushes the
    /// lease expiry to `lease_expires_at`.
    async fn mark_calling(
        &self,
        id: WorkItemId,
        worker_id: &str,
        lease_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Append `attempt` and move the entry per `disposition`, iff
    /// `worker_id` holds a live lease and no other attempt landed since
    /// the caller read the entry (`attempt.attempt_number` is the next one).
    /// Clears the lease.
    async fn apply_call_attempt(
        &self,
        id: WorkItemId,
        worker_id: &str,
        attempt: &CallAttempt,
        disposition: &CallDisposition,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // === Leases (both domains) ===

    /// Grant a lease iff the item is unleased or its lease has expired,
    /// and it is still in its offerable status.
    async fn try_acquire_lease(
        &self,
        work: WorkRef,
        worker_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Push the expiry of a live lease held by `worker_id`.
    async fn extend_lease(
        &self,
        work: WorkRef,
        worker_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Clear the lease iff `worker_id` is the holder.
    async fn release_lease(&self, work: WorkRef, worker_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Clear every lease that expired strictly before `now`. Returns the
    /// items whose lease was cleared by this call.
    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<WorkRef>>;

    // === Call records ===

    async fn insert_call_record(&self, call: &CatiCall) -> Result<()>;

    async fn get_call_record(&self, provider_call_id: &str) -> Result<Option<CatiCall>>;

    /// Store what a webhook reported: status, numbers, duration and
    /// recording URL. Numbers the callback omits keep their dial-time
    /// values. A newly reported recording URL puts the upload into
    /// `pending`.
    async fn update_provider_status(&self, event: &ProviderEvent) -> Result<bool>;

    /// Calls with a recording URL whose upload is pending or failed and
    /// has been tried fewer than `max_attempts` times, oldest first.
    async fn list_uploads_due(&self, max_attempts: u32, limit: usize) -> Result<Vec<CatiCall>>;

    async fn set_upload_state(
        &self,
        provider_call_id: &str,
        upload: &RecordingUpload,
        now: DateTime<Utc>,
    ) -> Result<()>;

    // === Partition assignments ===

    async fn get_partitions(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
    ) -> Result<Option<PartitionAssignment>>;

    /// Insert or atomically replace the worker's row. Never merges.
    async fn replace_partitions(&self, assignment: &PartitionAssignment) -> Result<()>;

    async fn remove_partition(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
        partition: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    async fn delete_partitions(&self, worker_id: &str, survey_id: &str, domain: Domain) -> Result<bool>;

    async fn accept_partitions(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    // === Available-assignment view ===

    async fn upsert_view_row(&self, row: &AvailableAssignment) -> Result<()>;

    async fn delete_view_row(&self, work: WorkRef) -> Result<()>;

    /// Offerable rows in rank order (priority desc, created_at asc).
    async fn view_candidates(&self, query: &CandidateQuery) -> Result<Vec<AvailableAssignment>>;

    async fn list_view(&self, domain: Domain, survey_id: Option<&str>) -> Result<Vec<AvailableAssignment>>;

    /// Atomically swap the rows for `domain` (and `survey_id`, if given).
    async fn replace_view(
        &self,
        domain: Domain,
        survey_id: Option<&str>,
        rows: &[AvailableAssignment],
    ) -> Result<()>;

    /// Flag `assigned` rows whose lease lapsed before `now` as `expired`.
    async fn mark_expired_view_rows(&self, now: DateTime<Utc>) -> Result<u64>;
}
