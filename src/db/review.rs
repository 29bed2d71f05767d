//! `survey_responses`: review items and their leases.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;

const RESPONSE_COLUMNS: &str = "id, survey_id, interviewer_id, interview_mode, status, partition_key, priority,
     has_audio, audio_file_size, audio_uploaded_at, audio_storage_key, audio_duration_secs,
     answer_count, qc_batch_id, is_sample, lease_holder, lease_assigned_at, lease_expires_at,
     verification, created_at, updated_at";

impl super::Db {
    pub async fn insert_response(&self, r: &SurveyResponse) -> Result<()> {
        let verification = r.verification.as_ref().map(serde_json::to_value).transpose()?;
        sqlx::query(
            "INSERT INTO survey_responses (id, survey_id, interviewer_id, interview_mode, status, partition_key, priority,
                 has_audio, audio_file_size, audio_uploaded_at, audio_storage_key, audio_duration_secs,
                 answer_count, qc_batch_id, is_sample, lease_holder, lease_assigned_at, lease_expires_at,
                 verification, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)",
        )
        .bind(r.id.0)
        .bind(&r.survey_id)
        .bind(&r.interviewer_id)
        .bind(r.interview_mode.as_str())
        .bind(r.status.as_str())
        .bind(&r.partition_key)
        .bind(r.priority)
        .bind(r.audio.has_audio)
        .bind(r.audio.file_size)
        .bind(r.audio.uploaded_at)
        .bind(&r.audio.storage_key)
        .bind(r.audio.duration_secs)
        .bind(r.answer_count as i32)
        .bind(&r.qc_batch_id)
        .bind(r.is_sample)
        .bind(r.lease.as_ref().map(|l| l.holder.as_str()))
        .bind(r.lease.as_ref().map(|l| l.assigned_at))
        .bind(r.lease.as_ref().map(|l| l.expires_at))
        .bind(verification)
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_response(&self, id: WorkItemId) -> Result<SurveyResponse> {
        let row: Option<ResponseRow> = sqlx::query_as(&format!(
            "SELECT {RESPONSE_COLUMNS} FROM survey_responses WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("survey response {id}")))?
            .try_into_response()
    }

    pub async fn list_pending_responses(&self, survey_id: Option<&str>) -> Result<Vec<SurveyResponse>> {
        let rows: Vec<ResponseRow> = sqlx::query_as(&format!(
            "SELECT {RESPONSE_COLUMNS} FROM survey_responses
             WHERE status = 'Pending_Approval' AND ($1::text IS NULL OR survey_id = $1)
             ORDER BY created_at, id"
        ))
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ResponseRow::try_into_response).collect()
    }

    pub async fn set_qc_batch(
        &self,
        id: WorkItemId,
        batch_id: Option<&str>,
        is_sample: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE survey_responses SET qc_batch_id = $1, is_sample = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(batch_id)
        .bind(is_sample)
        .bind(now)
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("survey response {id}")));
        }
        Ok(())
    }

    pub async fn record_decision(
        &self,
        id: WorkItemId,
        reviewer_id: &str,
        status: ReviewStatus,
        verification: &Verification,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE survey_responses
             SET status = $1, verification = $2, updated_at = $3,
                 lease_holder = NULL, lease_assigned_at = NULL, lease_expires_at = NULL
             WHERE id = $4 AND status = 'Pending_Approval'
               AND lease_holder = $5 AND lease_expires_at >= $3",
        )
        .bind(status.as_str())
        .bind(serde_json::to_value(verification)?)
        .bind(now)
        .bind(id.0)
        .bind(reviewer_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    pub(crate) async fn acquire_response_lease(
        &self,
        id: WorkItemId,
        worker_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE survey_responses
             SET lease_holder = $1, lease_assigned_at = $2, lease_expires_at = $3, updated_at = $2
             WHERE id = $4 AND status = 'Pending_Approval'
               AND (lease_holder IS NULL OR lease_expires_at IS NULL OR lease_expires_at < $2)",
        )
        .bind(worker_id)
        .bind(now)
        .bind(expires_at)
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    pub(crate) async fn extend_response_lease(
        &self,
        id: WorkItemId,
        worker_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE survey_responses SET lease_expires_at = $1, updated_at = $2
             WHERE id = $3 AND lease_holder = $4 AND lease_expires_at >= $2",
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

    pub(crate) async fn release_response_lease(
        &self,
        id: WorkItemId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE survey_responses
             SET lease_holder = NULL, lease_assigned_at = NULL, lease_expires_at = NULL, updated_at = $1
             WHERE id = $2 AND lease_holder = $3",
        )
        .bind(now)
        .bind(id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    pub(crate) async fn reclaim_response_leases(&self, now: DateTime<Utc>) -> Result<Vec<WorkItemId>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE survey_responses
             SET lease_holder = NULL, lease_assigned_at = NULL, lease_expires_at = NULL, updated_at = $1
             WHERE lease_holder IS NOT NULL AND (lease_expires_at IS NULL OR lease_expires_at < $1)
             RETURNING id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| WorkItemId(id)).collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ResponseRow {
    id: Uuid,
    survey_id: String,
    interviewer_id: String,
    interview_mode: String,
    status: String,
    partition_key: Option<String>,
    priority: i32,
    has_audio: bool,
    audio_file_size: Option<i64>,
    audio_uploaded_at: Option<DateTime<Utc>>,
    audio_storage_key: Option<String>,
    audio_duration_secs: Option<i64>,
    answer_count: i32,
    qc_batch_id: Option<String>,
    is_sample: bool,
    lease_holder: Option<String>,
    lease_assigned_at: Option<DateTime<Utc>>,
    lease_expires_at: Option<DateTime<Utc>>,
    verification: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResponseRow {
    fn try_into_response(self) -> Result<SurveyResponse> {
        let lease = match (self.lease_holder, self.lease_assigned_at, self.lease_expires_at) {
            (Some(holder), Some(assigned_at), Some(expires_at)) => Some(Lease {
                holder,
                assigned_at,
                expires_at,
            }),
            _ => None,
        };

        Ok(SurveyResponse {
            id: WorkItemId(self.id),
            survey_id: self.survey_id,
            interviewer_id: self.interviewer_id,
            interview_mode: self.interview_mode.parse()?,
            status: self.status.parse()?,
            partition_key: self.partition_key,
            priority: self.priority,
            audio: AudioRecording {
                has_audio: self.has_audio,
                file_size: self.audio_file_size,
                uploaded_at: self.audio_uploaded_at,
                storage_key: self.audio_storage_key,
                duration_secs: self.audio_duration_secs,
            },
            answer_count: self.answer_count.max(0) as u32,
            qc_batch_id: self.qc_batch_id,
            is_sample: self.is_sample,
            lease,
            verification: self.verification.map(serde_json::from_value).transpose()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
