//! `partition_assignments`: one row per (worker, survey, domain).

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::*;

impl super::Db {
    pub async fn get_partitions(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
    ) -> Result<Option<PartitionAssignment>> {
        let row: Option<PartitionRow> = sqlx::query_as(
            "SELECT worker_id, survey_id, domain, partitions, status, assigned_at, updated_at
             FROM partition_assignments
             WHERE worker_id = $1 AND survey_id = $2 AND domain = $3",
        )
        .bind(worker_id)
        .bind(survey_id)
        .bind(domain.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(PartitionRow::try_into_assignment).transpose()
    }

    /// Upsert that overwrites the whole set.
    pub async fn replace_partitions(&self, a: &PartitionAssignment) -> Result<()> {
        let partitions: Vec<String> = a.partitions.iter().cloned().collect();
        sqlx::query(
            "INSERT INTO partition_assignments (worker_id, survey_id, domain, partitions, status, assigned_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (worker_id, survey_id, domain) DO UPDATE
             SET partitions = EXCLUDED.partitions,
                 status = EXCLUDED.status,
                 assigned_at = EXCLUDED.assigned_at,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(&a.worker_id)
        .bind(&a.survey_id)
        .bind(a.domain.as_str())
        .bind(&partitions)
        .bind(a.status.as_str())
        .bind(a.assigned_at)
        .bind(a.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_partition(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
        partition: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE partition_assignments
             SET partitions = array_remove(partitions, $4), updated_at = $5
             WHERE worker_id = $1 AND survey_id = $2 AND domain = $3 AND $4 = ANY(partitions)",
        )
        .bind(worker_id)
        .bind(survey_id)
        .bind(domain.as_str())
        .bind(partition)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    pub async fn delete_partitions(&self, worker_id: &str, survey_id: &str, domain: Domain) -> Result<bool> {
        let rows_affected = sqlx::query(
            "DELETE FROM partition_assignments WHERE worker_id = $1 AND survey_id = $2 AND domain = $3",
        )
        .bind(worker_id)
        .bind(survey_id)
        .bind(domain.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    pub async fn accept_partitions(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected = sqlx::query(
            "UPDATE partition_assignments SET status = 'accepted', updated_at = $4
             WHERE worker_id = $1 AND survey_id = $2 AND domain = $3",
        )
        .bind(worker_id)
        .bind(survey_id)
        .bind(domain.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }
}

#[derive(sqlx::FromRow)]
struct PartitionRow {
    worker_id: String,
    survey_id: String,
    domain: String,
    partitions: Vec<String>,
    status: String,
    assigned_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PartitionRow {
    fn try_into_assignment(self) -> Result<PartitionAssignment> {
        Ok(PartitionAssignment {
            worker_id: self.worker_id,
            survey_id: self.survey_id,
            domain: self.domain.parse()?,
            partitions: self.partitions.into_iter().collect(),
            status: self.status.parse()?,
            assigned_at: self.assigned_at,
            updated_at: self.updated_at,
        })
    }
}
