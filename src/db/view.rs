//! `available_assignments`: the ranked candidate cache.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::*;

const VIEW_COLUMNS: &str =
    "domain, work_item_id, survey_id, partition_key, priority, status, created_at, lease_expires_at";

impl super::Db {
    pub async fn upsert_view_row(&self, row: &AvailableAssignment) -> Result<()> {
        upsert_row(&self.pool, row).await
    }

    pub async fn delete_view_row(&self, work: WorkRef) -> Result<()> {
        sqlx::query("DELETE FROM available_assignments WHERE domain = $1 AND work_item_id = $2")
            .bind(work.domain.as_str())
            .bind(work.id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn view_candidates(&self, query: &CandidateQuery) -> Result<Vec<AvailableAssignment>> {
        let partitions: Option<Vec<String>> = match &query.partitions {
            PartitionFilter::Any => None,
            PartitionFilter::Only(set) => Some(set.clone()),
            PartitionFilter::Nothing => return Ok(Vec::new()),
        };

        let rows: Vec<ViewRow> = sqlx::query_as(&format!(
            "SELECT {VIEW_COLUMNS} FROM available_assignments
             WHERE domain = $1 AND survey_id = $2
               AND ($3::text[] IS NULL OR partition_key = ANY($3))
               AND (status = 'available' OR lease_expires_at IS NULL OR lease_expires_at < $4)
             ORDER BY priority DESC, created_at ASC, work_item_id ASC
             LIMIT $5"
        ))
        .bind(query.domain.as_str())
        .bind(&query.survey_id)
        .bind(partitions)
        .bind(query.now)
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ViewRow::try_into_assignment).collect()
    }

    pub async fn list_view(&self, domain: Domain, survey_id: Option<&str>) -> Result<Vec<AvailableAssignment>> {
        let rows: Vec<ViewRow> = sqlx::query_as(&format!(
            "SELECT {VIEW_COLUMNS} FROM available_assignments
             WHERE domain = $1 AND ($2::text IS NULL OR survey_id = $2)
             ORDER BY priority DESC, created_at ASC, work_item_id ASC"
        ))
        .bind(domain.as_str())
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ViewRow::try_into_assignment).collect()
    }

    /// Delete-and-reinsert in one transaction so readers never see a
    /// half-built view.
    pub async fn replace_view(
        &self,
        domain: Domain,
        survey_id: Option<&str>,
        rows: &[AvailableAssignment],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM available_assignments WHERE domain = $1 AND ($2::text IS NULL OR survey_id = $2)",
        )
        .bind(domain.as_str())
        .bind(survey_id)
        .execute(&mut *tx)
        .await?;

        for row in rows {
            upsert_row(&mut *tx, row).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_expired_view_rows(&self, now: DateTime<Utc>) -> Result<u64> {
        let rows_affected = sqlx::query(
            "UPDATE available_assignments SET status = 'expired'
             WHERE status = 'assigned' AND lease_expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected)
    }
}

async fn upsert_row<'e, E>(executor: E, row: &AvailableAssignment) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO available_assignments (domain, work_item_id, survey_id, partition_key, priority, status, created_at, lease_expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (domain, work_item_id) DO UPDATE
         SET survey_id = EXCLUDED.survey_id,
             partition_key = EXCLUDED.partition_key,
             priority = EXCLUDED.priority,
             status = EXCLUDED.status,
             created_at = EXCLUDED.created_at,
             lease_expires_at = EXCLUDED.lease_expires_at",
    )
    .bind(row.domain.as_str())
    .bind(row.work_item_id.0)
    .bind(&row.survey_id)
    .bind(&row.partition_key)
    .bind(row.priority)
    .bind(row.status.as_str())
    .bind(row.created_at)
    .bind(row.lease_expires_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct ViewRow {
    domain: String,
    work_item_id: Uuid,
    survey_id: String,
    partition_key: Option<String>,
    priority: i32,
    status: String,
    created_at: DateTime<Utc>,
    lease_expires_at: Option<DateTime<Utc>>,
}

impl ViewRow {
    fn try_into_assignment(self) -> Result<AvailableAssignment> {
        Ok(AvailableAssignment {
            work_item_id: WorkItemId(self.work_item_id),
            survey_id: self.survey_id,
            domain: self.domain.parse()?,
            partition_key: self.partition_key,
            priority: self.priority,
            status: self.status.parse()?,
            created_at: self.created_at,
            lease_expires_at: self.lease_expires_at,
        })
    }
}
