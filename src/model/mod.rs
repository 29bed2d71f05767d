//! Core data model.
//!
//! Two kinds of assignable work share one leasing engine: interview
//! responses waiting for QC review, and respondent contacts waiting to be
//! called. Both carry a status, an optional lease, a survey, a partition
//! key (AC) and a priority.

pub mod call;
pub mod partition;
pub mod review;
pub mod view;

pub use call::*;
pub use partition::*;
pub use review::*;
pub use view::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Newtype for work item IDs (responses and queue entries alike).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId(pub Uuid);

impl WorkItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkItemId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(WorkItemId)
            .map_err(|e| Error::InvalidInput(format!("bad work item id '{s}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// Which kind of work a worker is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// QC review of completed interview responses.
    Review,
    /// Outbound CATI calls to respondent contacts.
    Call,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Review => "review",
            Domain::Call => "call",
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Domain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "review" | "qc" => Ok(Domain::Review),
            "call" | "cati" => Ok(Domain::Call),
            _ => Err(Error::InvalidInput(format!("unknown domain: {s}"))),
        }
    }
}

/// Domain-qualified reference to a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkRef {
    pub domain: Domain,
    pub id: WorkItemId,
}

impl WorkRef {
    pub fn new(domain: Domain, id: WorkItemId) -> Self {
        Self { domain, id }
    }
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// Time-boxed exclusive claim on a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: String,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// A lease is live up to and including `expires_at`; it becomes
    /// reclaimable strictly after.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }

    pub fn is_held_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.holder == worker_id && self.is_live(now)
    }
}

/// Result of a successful `request_work` / `force_assign` / `extend_lease`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrant {
    pub domain: Domain,
    pub work_item_id: WorkItemId,
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Work item
// ---------------------------------------------------------------------------

/// A work item of either domain, as read from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum WorkItem {
    Review(SurveyResponse),
    Call(RespondentQueueEntry),
}

impl WorkItem {
    pub fn domain(&self) -> Domain {
        match self {
            WorkItem::Review(_) => Domain::Review,
            WorkItem::Call(_) => Domain::Call,
        }
    }

    pub fn id(&self) -> WorkItemId {
        match self {
            WorkItem::Review(r) => r.id,
            WorkItem::Call(c) => c.id,
        }
    }

    pub fn work_ref(&self) -> WorkRef {
        WorkRef::new(self.domain(), self.id())
    }

    pub fn survey_id(&self) -> &str {
        match self {
            WorkItem::Review(r) => &r.survey_id,
            WorkItem::Call(c) => &c.survey_id,
        }
    }

    pub fn partition_key(&self) -> Option<&str> {
        match self {
            WorkItem::Review(r) => r.partition_key.as_deref(),
            WorkItem::Call(c) => Some(&c.contact.partition_key),
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            WorkItem::Review(r) => r.priority,
            WorkItem::Call(c) => c.priority,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            WorkItem::Review(r) => r.created_at,
            WorkItem::Call(c) => c.created_at,
        }
    }

    /// The live lease, if any.
    pub fn live_lease(&self, now: DateTime<Utc>) -> Option<Lease> {
        let lease = match self {
            WorkItem::Review(r) => r.lease.clone(),
            WorkItem::Call(c) => c.lease(),
        };
        lease.filter(|l| l.is_live(now))
    }

    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.live_lease(now).is_some()
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            WorkItem::Review(r) => r.status.is_terminal(),
            WorkItem::Call(c) => c.status.is_terminal(),
        }
    }
}
