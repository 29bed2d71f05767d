//! Rows of the available-assignment view: a rebuildable cache of listed
//! work items ranked by priority and age.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Domain, PartitionFilter, WorkItem, WorkItemId, WorkRef};
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableAssignment {
    pub work_item_id: WorkItemId,
    pub survey_id: String,
    pub domain: Domain,
    pub partition_key: Option<String>,
    pub priority: i32,
    pub status: ViewStatus,
    pub created_at: DateTime<Utc>,
    /// Expiry of the lease while `assigned`/`expired`.
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl AvailableAssignment {
    /// Build the row for a listed item. `priority` is the effective rank
    /// (possibly overridden by the AC priority map).
    pub fn for_item(item: &WorkItem, priority: i32, now: DateTime<Utc>) -> Self {
        let (status, lease_expires_at) = match item.live_lease(now) {
            Some(lease) => (ViewStatus::Assigned, Some(lease.expires_at)),
            None => (ViewStatus::Available, None),
        };
        Self {
            work_item_id: item.id(),
            survey_id: item.survey_id().to_string(),
            domain: item.domain(),
            partition_key: item.partition_key().map(str::to_string),
            priority,
            status,
            created_at: item.created_at(),
            lease_expires_at,
        }
    }

    pub fn work_ref(&self) -> WorkRef {
        WorkRef::new(self.domain, self.work_item_id)
    }

    /// Whether `request_work` may try this row at `now`.
    pub fn is_offerable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ViewStatus::Available => true,
            ViewStatus::Assigned | ViewStatus::Expired => {
                self.lease_expires_at.is_none_or(|at| now > at)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewStatus {
    Available,
    Assigned,
    /// Lease lapsed; waiting for the sweep to return it to `available`.
    Expired,
}

impl ViewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewStatus::Available => "available",
            ViewStatus::Assigned => "assigned",
            ViewStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for ViewStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(ViewStatus::Available),
            "assigned" => Ok(ViewStatus::Assigned),
            "expired" => Ok(ViewStatus::Expired),
            _ => Err(Error::Other(format!("unknown view status: {s}"))),
        }
    }
}

/// Candidate lookup for `request_work`.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub domain: Domain,
    pub survey_id: String,
    pub partitions: PartitionFilter,
    pub now: DateTime<Utc>,
    pub limit: usize,
}

/// Orders rows the way workers are served: priority desc, then oldest first.
pub fn rank_order(a: &AvailableAssignment, b: &AvailableAssignment) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.work_item_id.cmp(&b.work_item_id))
}
