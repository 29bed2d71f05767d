//! Per-worker AC restriction, keyed by (worker, survey, domain).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Domain;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub worker_id: String,
    pub survey_id: String,
    pub domain: Domain,
    pub partitions: BTreeSet<String>,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    /// The worker has acknowledged the assignment.
    Accepted,
}

impl AssignmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::Accepted => "accepted",
        }
    }
}

impl std::str::FromStr for AssignmentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(AssignmentStatus::Assigned),
            "accepted" => Ok(AssignmentStatus::Accepted),
            _ => Err(Error::Other(format!("unknown assignment status: {s}"))),
        }
    }
}

/// How a worker's partitions narrow the candidate set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionFilter {
    /// Every partition is a candidate.
    Any,
    /// Only these partitions.
    Only(Vec<String>),
    /// Empty set with wildcard disabled: nothing to offer.
    Nothing,
}

impl PartitionFilter {
    pub fn admits(&self, partition_key: Option<&str>) -> bool {
        match self {
            PartitionFilter::Any => true,
            PartitionFilter::Only(set) => {
                partition_key.is_some_and(|p| set.iter().any(|s| s == p))
            }
            PartitionFilter::Nothing => false,
        }
    }
}
