//! Partition (AC) assignment administration.

use std::collections::BTreeSet;

use tracing::info;

use super::Engine;
use crate::error::{Error, Result};
use crate::model::*;

impl Engine {
    /// Replace the worker's partition set. Never merges with the old set.
    pub async fn set_partitions<I, S>(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
        partitions: I,
    ) -> Result<PartitionAssignment>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let partitions: BTreeSet<String> = partitions
            .into_iter()
            .map(|p| p.as_ref().trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let now = self.now();
        let assignment = PartitionAssignment {
            worker_id: worker_id.to_string(),
            survey_id: survey_id.to_string(),
            domain,
            partitions,
            status: AssignmentStatus::Assigned,
            assigned_at: now,
            updated_at: now,
        };

        self.store.replace_partitions(&assignment).await?;
        info!(
            worker_id,
            survey_id,
            %domain,
            partitions = ?assignment.partitions,
            "partitions assigned"
        );
        Ok(assignment)
    }

    /// Drop one partition. `false` if it was not assigned.
    pub async fn remove_partition(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
        partition: &str,
    ) -> Result<bool> {
        let removed = self
            .store
            .remove_partition(worker_id, survey_id, domain, partition, self.now())
            .await?;
        if removed {
            info!(worker_id, survey_id, %domain, partition, "partition removed");
        }
        Ok(removed)
    }

    /// Take the worker off the survey for this domain.
    pub async fn remove_worker_from_domain(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
    ) -> Result<bool> {
        let removed = self
            .store
            .delete_partitions(worker_id, survey_id, domain)
            .await?;
        if removed {
            info!(worker_id, survey_id, %domain, "worker removed from domain");
        }
        Ok(removed)
    }

    pub async fn accept_partitions(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
    ) -> Result<()> {
        if !self
            .store
            .accept_partitions(worker_id, survey_id, domain, self.now())
            .await?
        {
            return Err(Error::NotFound(format!(
                "partition assignment for {worker_id} on {survey_id}/{domain}"
            )));
        }
        Ok(())
    }

    pub async fn partitions_for(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
    ) -> Result<Option<PartitionAssignment>> {
        self.store.get_partitions(worker_id, survey_id, domain).await
    }

    /// How the worker's partitions narrow `request_work`. No row counts as
    /// an empty set.
    pub(crate) async fn partition_filter(
        &self,
        worker_id: &str,
        survey_id: &str,
        domain: Domain,
    ) -> Result<PartitionFilter> {
        let partitions = self
            .store
            .get_partitions(worker_id, survey_id, domain)
            .await?
            .map(|a| a.partitions)
            .unwrap_or_default();

        Ok(if !partitions.is_empty() {
            PartitionFilter::Only(partitions.into_iter().collect())
        } else if self.policy.allow_unrestricted_when_empty {
            PartitionFilter::Any
        } else {
            PartitionFilter::Nothing
        })
    }
}
