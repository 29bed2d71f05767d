//! `respondent_queue` and `cati_calls`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::provider::ProviderEvent;

const ENTRY_COLUMNS: &str = "id, survey_id, phone, partition_key, respondent_name, priority, status,
     assigned_to, assigned_at, lease_expires_at, call_attempts, current_attempt_number,
     last_attempted_at, abandonment_reason, abandonment_notes, created_at, updated_at";

const CALL_COLUMNS: &str = "id, provider_call_id, queue_entry_id, survey_id, attempted_by, from_number, to_number,
     duration_secs, provider_status, webhook_received_at, recording_url, upload_status, upload_error,
     upload_attempts, storage_key, uploaded_at, created_at, updated_at";

impl super::Db {
    // === Queue entries ===

    pub async fn insert_queue_entry(&self, e: &RespondentQueueEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO respondent_queue (id, survey_id, phone, partition_key, respondent_name, priority, status,
                 assigned_to, assigned_at, lease_expires_at, call_attempts, current_attempt_number,
                 last_attempted_at, abandonment_reason, abandonment_notes, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(e.id.0)
        .bind(&e.survey_id)
        .bind(&e.contact.phone)
        .bind(&e.contact.partition_key)
        .bind(&e.contact.name)
        .bind(e.priority)
        .bind(e.status.as_str())
        .bind(&e.assigned_to)
        .bind(e.assigned_at)
        .bind(e.lease_expires_at)
        .bind(serde_json::to_value(&e.call_attempts)?)
        .bind(e.current_attempt_number as i32)
        .bind(e.last_attempted_at)
        .bind(&e.abandonment_reason)
        .bind(&e.abandonment_notes)
        .bind(e.created_at)
        .bind(e.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_queue_entry(&self, id: WorkItemId) -> Result<RespondentQueueEntry> {
        let row: Option<QueueEntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM respondent_queue WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("queue entry {id}")))?
            .try_into_entry()
    }

    pub async fn list_open_queue_entries(&self, survey_id: Option<&str>) -> Result<Vec<RespondentQueueEntry>> {
        let rows: Vec<QueueEntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM respondent_queue
             WHERE status NOT IN ('completed', 'abandoned') AND ($1::text IS NULL OR survey_id = $1)
             ORDER BY created_at, id"
        ))
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(QueueEntryRow::try_into_entry).collect()
    }

    pub async fn mark_calling(
        &self,
        id: WorkItemId,
        worker_id: &str,
        lease_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE respondent_queue SET status = 'calling', lease_expires_at = $1, updated_at = $2
             WHERE id = $3 AND status = 'assigned' AND assigned_to = $4 AND lease_expires_at >= $2",
        )
        .bind(lease_expires_at)
        .bind(now)
        .bind(id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    pub async fn apply_call_attempt(
        &self,
        id: WorkItemId,
        worker_id: &str,
        attempt: &CallAttempt,
        disposition: &CallDisposition,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let (reason, notes) = match disposition {
            CallDisposition::Abandoned { reason, notes } => (Some(reason.as_str()), notes.as_deref()),
            _ => (None, None),
        };

        // The attempt-number guard rejects a second attempt racing on the
        // same lease read.
        let rows_affected = sqlx::query(
            "UPDATE respondent_queue
             SET call_attempts = call_attempts || $1,
                 current_attempt_number = $2,
                 last_attempted_at = $3,
                 status = $4,
                 abandonment_reason = COALESCE($5, abandonment_reason),
                 abandonment_notes = COALESCE($6, abandonment_notes),
                 assigned_to = NULL, assigned_at = NULL, lease_expires_at = NULL,
                 updated_at = $7
             WHERE id = $8 AND status IN ('assigned', 'calling')
               AND assigned_to = $9 AND lease_expires_at >= $7
               AND current_attempt_number = $2 - 1",
        )
        .bind(serde_json::to_value([attempt])?)
        .bind(attempt.attempt_number as i32)
        .bind(attempt.attempted_at)
        .bind(disposition.target_status().as_str())
        .bind(reason)
        .bind(notes)
        .bind(now)
        .bind(id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    pub(crate) async fn acquire_call_lease(
        &self,
        id: WorkItemId,
        worker_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // A lapsed lease is reclaimed first (assigned/calling -> pending).
        sqlx::query(
            "UPDATE respondent_queue
             SET status = 'pending', assigned_to = NULL, assigned_at = NULL, lease_expires_at = NULL, updated_at = $1
             WHERE id = $2 AND status IN ('assigned', 'calling')
               AND (lease_expires_at IS NULL OR lease_expires_at < $1)",
        )
        .bind(now)
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

        let rows_affected = sqlx::query(
            "UPDATE respondent_queue
             SET status = 'assigned', assigned_to = $1, assigned_at = $2, lease_expires_at = $3, updated_at = $2
             WHERE id = $4 AND status = 'pending'",
        )
        .bind(worker_id)
        .bind(now)
        .bind(expires_at)
        .bind(id.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(rows_affected == 1)
    }

    pub(crate) async fn extend_call_lease(
        &self,
        id: WorkItemId,
        worker_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE respondent_queue SET lease_expires_at = $1, updated_at = $2
             WHERE id = $3 AND status IN ('assigned', 'calling')
               AND assigned_to = $4 AND lease_expires_at >= $2",
        )
        .bind(expires_at)
        .bind(now)
        .bind(id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    pub(crate) async fn release_call_lease(
        &self,
        id: WorkItemId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE respondent_queue
             SET status = 'pending', assigned_to = NULL, assigned_at = NULL, lease_expires_at = NULL, updated_at = $1
             WHERE id = $2 AND status IN ('assigned', 'calling') AND assigned_to = $3",
        )
        .bind(now)
        .bind(id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    /// Stuck `assigned`/`calling` entries go back to `pending`.
    pub(crate) async fn reclaim_call_leases(&self, now: DateTime<Utc>) -> Result<Vec<WorkItemId>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE respondent_queue
             SET status = 'pending', assigned_to = NULL, assigned_at = NULL, lease_expires_at = NULL, updated_at = $1
             WHERE status IN ('assigned', 'calling')
               AND (lease_expires_at IS NULL OR lease_expires_at < $1)
             RETURNING id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| WorkItemId(id)).collect())
    }

    // === Call records ===

    pub async fn insert_call_record(&self, c: &CatiCall) -> Result<()> {
        sqlx::query(
            "INSERT INTO cati_calls (id, provider_call_id, queue_entry_id, survey_id, attempted_by, from_number, to_number,
                 duration_secs, provider_status, webhook_received_at, recording_url, upload_status, upload_error,
                 upload_attempts, storage_key, uploaded_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(c.id)
        .bind(&c.provider_call_id)
        .bind(c.queue_entry_id.0)
        .bind(&c.survey_id)
        .bind(&c.attempted_by)
        .bind(&c.from_number)
        .bind(&c.to_number)
        .bind(c.duration_secs.map(|d| d as i32))
        .bind(c.provider_status.map(ProviderStatus::as_str))
        .bind(c.webhook_received_at)
        .bind(&c.recording_url)
        .bind(c.upload.status.map(UploadStatus::as_str))
        .bind(&c.upload.error)
        .bind(c.upload.attempts as i32)
        .bind(&c.upload.storage_key)
        .bind(c.upload.uploaded_at)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_call_record(&self, provider_call_id: &str) -> Result<Option<CatiCall>> {
        let row: Option<CatiCallRow> = sqlx::query_as(&format!(
            "SELECT {CALL_COLUMNS} FROM cati_calls WHERE provider_call_id = $1"
        ))
        .bind(provider_call_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CatiCallRow::try_into_call).transpose()
    }

    pub async fn update_provider_status(&self, event: &ProviderEvent) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE cati_calls
             SET provider_status = $1,
                 webhook_received_at = $2,
                 updated_at = $2,
                 upload_status = CASE WHEN $3::text IS NOT NULL AND recording_url IS DISTINCT FROM $3
                                      THEN 'pending' ELSE upload_status END,
                 upload_error = CASE WHEN $3::text IS NOT NULL AND recording_url IS DISTINCT FROM $3
                                     THEN NULL ELSE upload_error END,
                 recording_url = COALESCE($3, recording_url),
                 from_number = COALESCE($4, from_number),
                 to_number = COALESCE($5, to_number),
                 duration_secs = COALESCE($6, duration_secs)
             WHERE provider_call_id = $7",
        )
        .bind(event.status.as_str())
        .bind(event.received_at)
        .bind(event.recording_url.as_deref())
        .bind(event.from_number.as_deref())
        .bind(event.to_number.as_deref())
        .bind(event.duration_secs.map(|d| d as i32))
        .bind(&event.provider_call_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    pub async fn list_uploads_due(&self, max_attempts: u32, limit: usize) -> Result<Vec<CatiCall>> {
        let rows: Vec<CatiCallRow> = sqlx::query_as(&format!(
            "SELECT {CALL_COLUMNS} FROM cati_calls
             WHERE recording_url IS NOT NULL
               AND upload_status IN ('pending', 'failed')
               AND upload_attempts < $1
             ORDER BY created_at, provider_call_id
             LIMIT $2"
        ))
        .bind(max_attempts as i32)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CatiCallRow::try_into_call).collect()
    }

    pub async fn set_upload_state(
        &self,
        provider_call_id: &str,
        upload: &RecordingUpload,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE cati_calls
             SET upload_status = $1, upload_error = $2, upload_attempts = $3,
                 storage_key = $4, uploaded_at = $5, updated_at = $6
             WHERE provider_call_id = $7",
        )
        .bind(upload.status.map(UploadStatus::as_str))
        .bind(&upload.error)
        .bind(upload.attempts as i32)
        .bind(&upload.storage_key)
        .bind(upload.uploaded_at)
        .bind(now)
        .bind(provider_call_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("call {provider_call_id}")));
        }
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct QueueEntryRow {
    id: Uuid,
    survey_id: String,
    phone: String,
    partition_key: String,
    respondent_name: Option<String>,
    priority: i32,
    status: String,
    assigned_to: Option<String>,
    assigned_at: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>,
    call_attempts: serde_json::Value,
    current_attempt_number: i32,
    last_attempted_at: Option<DateTime<Utc>>,
    abandonment_reason: Option<String>,
    abandonment_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl QueueEntryRow {
    fn try_into_entry(self) -> Result<RespondentQueueEntry> {
        Ok(RespondentQueueEntry {
            id: WorkItemId(self.id),
            survey_id: self.survey_id,
            contact: RespondentContact {
                phone: self.phone,
                partition_key: self.partition_key,
                name: self.respondent_name,
            },
            priority: self.priority,
            status: self.status.parse()?,
            assigned_to: self.assigned_to,
            assigned_at: self.assigned_at,
            lease_expires_at: self.lease_expires_at,
            call_attempts: serde_json::from_value(self.call_attempts)?,
            current_attempt_number: self.current_attempt_number.max(0) as u32,
            last_attempted_at: self.last_attempted_at,
            abandonment_reason: self.abandonment_reason,
            abandonment_notes: self.abandonment_notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CatiCallRow {
    id: Uuid,
    provider_call_id: String,
    queue_entry_id: Uuid,
    survey_id: String,
    attempted_by: String,
    from_number: Option<String>,
    to_number: String,
    duration_secs: Option<i32>,
    provider_status: Option<String>,
    webhook_received_at: Option<DateTime<Utc>>,
    recording_url: Option<String>,
    upload_status: Option<String>,
    upload_error: Option<String>,
    upload_attempts: i32,
    storage_key: Option<String>,
    uploaded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CatiCallRow {
    fn try_into_call(self) -> Result<CatiCall> {
        Ok(CatiCall {
            id: self.id,
            provider_call_id: self.provider_call_id,
            queue_entry_id: WorkItemId(self.queue_entry_id),
            survey_id: self.survey_id,
            attempted_by: self.attempted_by,
            from_number: self.from_number,
            to_number: self.to_number,
            duration_secs: self.duration_secs.map(|d| d.max(0) as u32),
            provider_status: self.provider_status.map(|s| s.parse()).transpose()?,
            webhook_received_at: self.webhook_received_at,
            recording_url: self.recording_url,
            upload: RecordingUpload {
                status: self.upload_status.map(|s| s.parse()).transpose()?,
                error: self.upload_error,
                attempts: self.upload_attempts.max(0) as u32,
                storage_key: self.storage_key,
                uploaded_at: self.uploaded_at,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
