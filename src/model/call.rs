//! Call domain: respondent contacts queued for CATI interviewers, the
//! per-entry attempt history, and the per-dial `CatiCall` records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Lease, WorkItemId};
use crate::error::Error;

// ---------------------------------------------------------------------------
// Queue entry
// ---------------------------------------------------------------------------

/// One respondent to be called ("RespondentQueueEntry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RespondentQueueEntry {
    pub id: WorkItemId,
    pub survey_id: String,
    pub contact: RespondentContact,
    pub priority: i32,
    pub status: CallStatus,

    /// Lease holder while `assigned`/`calling`.
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Ordered attempt history.
    pub call_attempts: Vec<CallAttempt>,
    pub current_attempt_number: u32,
    pub last_attempted_at: Option<DateTime<Utc>>,

    pub abandonment_reason: Option<String>,
    pub abandonment_notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RespondentQueueEntry {
    /// The lease encoded by `assigned_to`/`assigned_at`/`lease_expires_at`.
    pub fn lease(&self) -> Option<Lease> {
        if !matches!(self.status, CallStatus::Assigned | CallStatus::Calling) {
            return None;
        }
        match (&self.assigned_to, self.assigned_at, self.lease_expires_at) {
            (Some(holder), Some(assigned_at), Some(expires_at)) => Some(Lease {
                holder: holder.clone(),
                assigned_at,
                expires_at,
            }),
            _ => None,
        }
    }

    pub fn is_leased_by(&self, worker_id: &str, now: DateTime<Utc>) -> bool {
        self.lease().is_some_and(|l| l.is_held_by(worker_id, now))
    }

    /// An assigned/calling entry whose lease lapsed (or was never recorded).
    pub fn lease_lapsed(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, CallStatus::Assigned | CallStatus::Calling)
            && self.lease_expires_at.is_none_or(|at| now > at)
    }

    /// The status once any due reclaim is applied: a lapsed lease reads as
    /// `pending` whether or not the sweep has run.
    pub fn effective_status(&self, now: DateTime<Utc>) -> CallStatus {
        if self.lease_lapsed(now) {
            CallStatus::Pending
        } else {
            self.status
        }
    }

    /// Whether an attempt for this provider call has already been recorded.
    pub fn has_attempt_for_call(&self, provider_call_id: &str) -> bool {
        self.call_attempts
            .iter()
            .any(|a| a.provider_call_id.as_deref() == Some(provider_call_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondentContact {
    pub phone: String,
    /// AC the respondent belongs to.
    pub partition_key: String,
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Waiting for an interviewer.
    Pending,
    /// Leased to an interviewer, not yet dialled.
    Assigned,
    /// Dial in progress.
    Calling,
    /// Interview reached. Terminal.
    Completed,
    /// Retries exhausted or number unusable. Terminal.
    Abandoned,
}

impl CallStatus {
    pub fn can_transition_to(self, to: CallStatus) -> bool {
        use CallStatus::*;
        matches!(
            (self, to),
            (Pending, Assigned)
                | (Assigned, Calling)
                | (Assigned, Pending)   // released or reclaimed
                | (Calling, Pending)    // retryable outcome or reclaimed
                | (Assigned, Completed)
                | (Calling, Completed)
                | (Assigned, Abandoned)
                | (Calling, Abandoned)
        )
    }

    /// `can_transition_to` as a `Result`.
    pub fn check_transition(self, to: CallStatus) -> Result<(), Error> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Assigned => "assigned",
            CallStatus::Calling => "calling",
            CallStatus::Completed => "completed",
            CallStatus::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CallStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CallStatus::Pending),
            "assigned" => Ok(CallStatus::Assigned),
            "calling" => Ok(CallStatus::Calling),
            "completed" => Ok(CallStatus::Completed),
            "abandoned" => Ok(CallStatus::Abandoned),
            _ => Err(Error::Other(format!("unknown call status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Attempts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAttempt {
    pub attempt_number: u32,
    pub attempted_at: DateTime<Utc>,
    pub attempted_by: String,
    pub outcome: CallOutcome,
    pub provider_call_id: Option<String>,
    pub notes: Option<String>,
}

/// Result of one dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Respondent reached; the interview happened.
    Answered,
    NoAnswer,
    Busy,
    Cancelled,
    /// Telephony provider failed to place the call.
    ProviderError,
    /// Number does not exist or is unreachable for good.
    InvalidNumber,
    /// Respondent declined to take part.
    Refused,
}

impl CallOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, CallOutcome::Answered)
    }

    /// Retryable failures go back to the queue until the retry ceiling.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            CallOutcome::NoAnswer
                | CallOutcome::Busy
                | CallOutcome::Cancelled
                | CallOutcome::ProviderError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CallOutcome::Answered => "answered",
            CallOutcome::NoAnswer => "no_answer",
            CallOutcome::Busy => "busy",
            CallOutcome::Cancelled => "cancelled",
            CallOutcome::ProviderError => "provider_error",
            CallOutcome::InvalidNumber => "invalid_number",
            CallOutcome::Refused => "refused",
        }
    }
}

impl std::fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CallOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "answered" => Ok(CallOutcome::Answered),
            "no_answer" | "no-answer" => Ok(CallOutcome::NoAnswer),
            "busy" => Ok(CallOutcome::Busy),
            "cancelled" => Ok(CallOutcome::Cancelled),
            "provider_error" | "failed" => Ok(CallOutcome::ProviderError),
            "invalid_number" | "number_does_not_exist" => Ok(CallOutcome::InvalidNumber),
            "refused" => Ok(CallOutcome::Refused),
            _ => Err(Error::InvalidInput(format!("unknown call outcome: {s}"))),
        }
    }
}

/// Where an entry goes after an attempt is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "next", rename_all = "snake_case")]
pub enum CallDisposition {
    Completed,
    /// Back to the queue for another attempt.
    Pending,
    Abandoned {
        reason: String,
        notes: Option<String>,
    },
}

impl CallDisposition {
    pub fn target_status(&self) -> CallStatus {
        match self {
            CallDisposition::Completed => CallStatus::Completed,
            CallDisposition::Pending => CallStatus::Pending,
            CallDisposition::Abandoned { .. } => CallStatus::Abandoned,
        }
    }

    pub fn label(&self) -> &'static str {
        self.target_status().as_str()
    }
}

pub const ABANDON_MAX_ATTEMPTS: &str = "max_attempts_exceeded";

// ---------------------------------------------------------------------------
// CatiCall
// ---------------------------------------------------------------------------

/// One row per dial, correlated to its queue entry by provider call id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatiCall {
    pub id: Uuid,
    pub provider_call_id: String,
    pub queue_entry_id: WorkItemId,
    pub survey_id: String,
    pub attempted_by: String,
    pub from_number: Option<String>,
    pub to_number: String,
    /// Talk time reported by the provider.
    pub duration_secs: Option<u32>,
    pub provider_status: Option<ProviderStatus>,
    pub webhook_received_at: Option<DateTime<Utc>>,
    pub recording_url: Option<String>,
    pub upload: RecordingUpload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalized provider call status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderStatus {
    Answered,
    Busy,
    NoAnswer,
    Cancelled,
    Failed,
    Completed,
}

impl ProviderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderStatus::Answered => "answered",
            ProviderStatus::Busy => "busy",
            ProviderStatus::NoAnswer => "no-answer",
            ProviderStatus::Cancelled => "cancelled",
            ProviderStatus::Failed => "failed",
            ProviderStatus::Completed => "completed",
        }
    }

    /// The attempt outcome this status settles, if any. `completed` is a
    /// call-record status only and settles nothing.
    pub fn attempt_outcome(self) -> Option<CallOutcome> {
        match self {
            ProviderStatus::Answered => Some(CallOutcome::Answered),
            ProviderStatus::Busy => Some(CallOutcome::Busy),
            ProviderStatus::NoAnswer => Some(CallOutcome::NoAnswer),
            ProviderStatus::Cancelled => Some(CallOutcome::Cancelled),
            ProviderStatus::Failed => Some(CallOutcome::ProviderError),
            ProviderStatus::Completed => None,
        }
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "answered" => Ok(ProviderStatus::Answered),
            "busy" => Ok(ProviderStatus::Busy),
            "no-answer" => Ok(ProviderStatus::NoAnswer),
            "cancelled" => Ok(ProviderStatus::Cancelled),
            "failed" => Ok(ProviderStatus::Failed),
            "completed" => Ok(ProviderStatus::Completed),
            _ => Err(Error::Other(format!("unknown provider status: {s}"))),
        }
    }
}

/// Independent upload state machine for the call recording.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingUpload {
    /// None until the provider reports a recording URL.
    pub status: Option<UploadStatus>,
    pub error: Option<String>,
    pub attempts: u32,
    pub storage_key: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
    /// Recording gone at the provider. Terminal.
    Deleted,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed => "failed",
            UploadStatus::Deleted => "deleted",
        }
    }

    /// Pending and failed uploads are picked up by the retry job.
    pub fn is_retryable(self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Failed)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "uploaded" => Ok(UploadStatus::Uploaded),
            "failed" => Ok(UploadStatus::Failed),
            "deleted" => Ok(UploadStatus::Deleted),
            _ => Err(Error::Other(format!("unknown upload status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder used by the contact-list loader.
pub struct NewQueueEntry {
    pub(crate) survey_id: String,
    pub(crate) phone: String,
    pub(crate) partition_key: String,
    pub(crate) name: Option<String>,
    pub(crate) priority: i32,
    pub(crate) created_at: Option<DateTime<Utc>>,
}

impl NewQueueEntry {
    pub fn new(
        survey_id: impl Into<String>,
        phone: impl Into<String>,
        ac: impl Into<String>,
    ) -> Self {
        Self {
            survey_id: survey_id.into(),
            phone: phone.into(),
            partition_key: ac.into(),
            name: None,
            priority: 0,
            created_at: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Phone and AC must be present before the entry becomes visible.
    pub(crate) fn build(self, now: DateTime<Utc>) -> Result<RespondentQueueEntry, Error> {
        let phone: String = self
            .phone
            .chars()
            .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
            .collect();
        if phone.is_empty() {
            return Err(Error::InvalidInput("contact has no phone number".to_string()));
        }
        let ac = self.partition_key.trim().to_string();
        if ac.is_empty() {
            return Err(Error::InvalidInput("contact has no AC".to_string()));
        }

        Ok(RespondentQueueEntry {
            id: WorkItemId::new(),
            survey_id: self.survey_id,
            contact: RespondentContact {
                phone,
                partition_key: ac,
                name: self.name,
            },
            priority: self.priority,
            status: CallStatus::Pending,
            assigned_to: None,
            assigned_at: None,
            lease_expires_at: None,
            call_attempts: Vec::new(),
            current_attempt_number: 0,
            last_attempted_at: None,
            abandonment_reason: None,
            abandonment_notes: None,
            created_at: self.created_at.unwrap_or(now),
            updated_at: now,
        })
    }
}
