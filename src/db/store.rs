//! [`WorkStore`] on Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Db;
use crate::error::Result;
use crate::model::*;
use crate::provider::ProviderEvent;
use crate::store::WorkStore;

#[async_trait]
impl WorkStore for Db {
    async fn insert_response(&self, response: &SurveyResponse) -> Result<()> {
        Db::insert_response(self, response).await
    }

    async fn get_response(&self, id: WorkItemId) -> Result<SurveyResponse> {
        Db::get_response(self, id).await
    }

    async fn list_pending_responses(&self, survey_id: Option<&str>) -> Result<Vec<SurveyResponse>> {
        Db::list_pending_responses(self, survey_id).await
    }

    async fn set_qc_batch(
        &self,
        id: WorkItemId,
        batch_id: Option<&str>,
        is_sample: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        Db::set_qc_batch(self, id, batch_id, is_sample, now).await
    }

    async fn record_decision(
        &self,
        id: WorkItemId,
        reviewer_id: &str,
        status: ReviewStatus,
        verification: &Verification,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Db::record_decision(self, id, reviewer_id, status, verification, now).await
    }

    async fn insert_queue_entry(&self, entry: &RespondentQueueEntry) -> Result<()> {
        Db::insert_queue_entry(self, entry).await
    }

    async fn get_queue_entry(&self, id: WorkItemId) -> Result<RespondentQueueEntry> {
        Db::get_queue_entry(self, id).await
    }

    async fn list_open_queue_entries(&self, survey_id: Option<&str>) -> Result<Vec<RespondentQueueEntry>> {
        Db::list_open_queue_entries(self, survey_id).await
    }

    async fn mark_calling(
        &self,
        id: WorkItemId,
        worker_id: &str,
        lease_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Db::mark_calling(self, id, worker_id, lease_expires_at, now).await
    }

    async fn apply_call_attempt(
        &self,
        id: WorkItemId,
        worker_id: &str,
        attempt: &CallAttempt,
        disposition: &CallDisposition,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Db::apply_call_attempt(self, id, worker_id, attempt, disposition, now).await
    }

    async fn try_acquire_lease(
        &self,
        work: WorkRef,
        worker_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        match work.domain {
            Domain::Review => self.acquire_response_lease(work.id, worker_id, now, expires_at).await,
            Domain::Call => self.acquire_call_lease(work.id, worker_id, now, expires_at).await,
        }
    }

    async fn extend_lease(
        &self,
        work: WorkRef,
        worker_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        match work.domain {
            Domain::Review => self.extend_response_lease(work.id, worker_id, now, expires_at).await,
            Domain::Call => self.extend_call_lease(work.id, worker_id, now, expires_at).await,
        }
    }

    async fn release_lease(&self, work: WorkRef, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        match work.domain {
            Domain::Review => self.release_response_lease(work.id, worker_id, now).await,
            Domain::Call => self.release_call_lease(work.id, worker_id, now).await,
        }
    }

    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<WorkRef>> {
        let mut reclaimed: Vec<WorkRef> = self
            .reclaim_response_leases(now)
            .await?
            .into_iter()
            .map(|id| WorkRef::new(Domain::Review, id))
            .collect();
        reclaimed.extend(
            self.reclaim_call_leases(now)
                .await?
                .into_iter()
                .map(|id| WorkRef::new(Domain::Call, id)),
        );
        reclaimed.sort();
        Ok(reclaimed)
    }

    async fn insert_call_record(&self, call: &CatiCall) -> Result<()> {
        Db::insert_call_record(self, call).await
    }

    async fn get_call_record(&self, provider_call_id: &str) -> Result<Option<CatiCall>> {
        Db::get_call_record(self, provider_call_id).await
    }

    async fn update_provider_status(&self, event: &ProviderEvent) -> Result<bool> {
        Db::update_provider_status(self, event).await
    }

    async fn list_uploads_due(&self, max_attempts: u32, limit: usize) -> Result<Vec<CatiCall>> {
        Db::list_uploads_due(self, max_attempts, limit).await
    }

    async fn set_upload_state(
        &self,
        provider_call_id: &str,
        upload: &RecordingUpload,
        now: DateTime<Utc>,
    ) -> Result<()> {
        Db::set_upload_state(self, provider_call_id, upload, now).await
    }

    async fn get_partitions(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
    ) -> Result<Option<PartitionAssignment>> {
        Db::get_partitions(self, worker_id, survey_id, domain).await
    }

    async fn replace_partitions(&self, assignment: &PartitionAssignment) -> Result<()> {
        Db::replace_partitions(self, assignment).await
    }

    async fn remove_partition(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
        partition: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Db::remove_partition(self, worker_id, survey_id, domain, partition, now).await
    }

    async fn delete_partitions(&self, worker_id: &str, survey_id: &str, domain: Domain) -> Result<bool> {
        Db::delete_partitions(self, worker_id, survey_id, domain).await
    }

    async fn accept_partitions(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Db::accept_partitions(self, worker_id, survey_id, domain, now).await
    }

    async fn upsert_view_row(&self, row: &AvailableAssignment) -> Result<()> {
        Db::upsert_view_row(self, row).await
    }

    async fn delete_view_row(&self, work: WorkRef) -> Result<()> {
        Db::delete_view_row(self, work).await
    }

    async fn view_candidates(&self, query: &CandidateQuery) -> Result<Vec<AvailableAssignment>> {
        Db::view_candidates(self, query).await
    }

    async fn list_view(&self, domain: Domain, survey_id: Option<&str>) -> Result<Vec<AvailableAssignment>> {
        Db::list_view(self, domain, survey_id).await
    }

    async fn replace_view(
        &self,
        domain: Domain,
        survey_id: Option<&str>,
        rows: &[AvailableAssignment],
    ) -> Result<()> {
        Db::replace_view(self, domain, survey_id, rows).await
    }

    async fn mark_expired_view_rows(&self, now: DateTime<Utc>) -> Result<u64> {
        Db::mark_expired_view_rows(self, now).await
    }
}
