//! Review domain: interview responses waiting for QC approval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Lease, WorkItemId};
use crate::error::Error;

/// A completed interview response ("SurveyResponse").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub id: WorkItemId,
    pub survey_id: String,

    /// The interviewer who collected the response (not the reviewer).
    pub interviewer_id: String,

    pub interview_mode: InterviewMode,
    pub status: ReviewStatus,

    /// AC the response belongs to.
    pub partition_key: Option<String>,

    /// Higher = offered first.
    pub priority: i32,

    pub audio: AudioRecording,

    /// Number of recorded answers.
    pub answer_count: u32,

    /// QC sampling batch the response currently sits in, if any.
    pub qc_batch_id: Option<String>,

    /// Sampled responses stay reviewable even inside a batch.
    pub is_sample: bool,

    pub lease: Option<Lease>,

    /// Set only on the terminal transition.
    pub verification: Option<Verification>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How the interview was conducted. CAPI responses are audio-backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewMode {
    Capi,
    Cati,
}

impl InterviewMode {
    pub fn is_audio_backed(self) -> bool {
        matches!(self, InterviewMode::Capi)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InterviewMode::Capi => "capi",
            InterviewMode::Cati => "cati",
        }
    }
}

impl std::str::FromStr for InterviewMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capi" => Ok(InterviewMode::Capi),
            "cati" => Ok(InterviewMode::Cati),
            _ => Err(Error::Other(format!("unknown interview mode: {s}"))),
        }
    }
}

/// Audio recording metadata attached to a CAPI response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRecording {
    pub has_audio: bool,
    pub file_size: Option<i64>,
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Object storage key, e.g. `audio/interviews/<survey>/<response>.webm`.
    pub storage_key: Option<String>,
    pub duration_secs: Option<i64>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewStatus {
    #[serde(rename = "Pending_Approval")]
    PendingApproval,
    Approved,
    Rejected,
    Abandoned,
    Terminated,
}

impl ReviewStatus {
    /// Approved and Rejected are final decisions.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReviewStatus::Approved | ReviewStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::PendingApproval => "Pending_Approval",
            ReviewStatus::Approved => "Approved",
            ReviewStatus::Rejected => "Rejected",
            ReviewStatus::Abandoned => "Abandoned",
            ReviewStatus::Terminated => "Terminated",
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending_Approval" => Ok(ReviewStatus::PendingApproval),
            "Approved" => Ok(ReviewStatus::Approved),
            "Rejected" => Ok(ReviewStatus::Rejected),
            "Abandoned" => Ok(ReviewStatus::Abandoned),
            "Terminated" => Ok(ReviewStatus::Terminated),
            _ => Err(Error::Other(format!("unknown review status: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Reviewer verdict recorded on the terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub reviewer_id: String,
    pub reviewed_at: DateTime<Utc>,
    /// Per-criterion answers from the QC form. Opaque to the engine.
    pub criteria: serde_json::Value,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approve,
    Reject,
}

impl DecisionOutcome {
    pub fn target_status(self) -> ReviewStatus {
        match self {
            DecisionOutcome::Approve => ReviewStatus::Approved,
            DecisionOutcome::Reject => ReviewStatus::Rejected,
        }
    }
}

/// What a reviewer submits for a leased response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    pub criteria: serde_json::Value,
    pub feedback: Option<String>,
}

impl Decision {
    pub fn approve(criteria: serde_json::Value) -> Self {
        Self {
            outcome: DecisionOutcome::Approve,
            criteria,
            feedback: None,
        }
    }

    pub fn reject(criteria: serde_json::Value, feedback: impl Into<String>) -> Self {
        Self {
            outcome: DecisionOutcome::Reject,
            criteria,
            feedback: Some(feedback.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder used by the interview-submission pipeline to hand a response to the engine.
pub struct NewSurveyResponse {
    pub(crate) survey_id: String,
    pub(crate) interviewer_id: String,
    pub(crate) interview_mode: InterviewMode,
    pub(crate) partition_key: Option<String>,
    pub(crate) priority: i32,
    pub(crate) audio: AudioRecording,
    pub(crate) answer_count: u32,
    pub(crate) qc_batch_id: Option<String>,
    pub(crate) is_sample: bool,
    pub(crate) created_at: Option<DateTime<Utc>>,
}

impl NewSurveyResponse {
    pub fn new(
        survey_id: impl Into<String>,
        interviewer_id: impl Into<String>,
        interview_mode: InterviewMode,
    ) -> Self {
        Self {
            survey_id: survey_id.into(),
            interviewer_id: interviewer_id.into(),
            interview_mode,
            partition_key: None,
            priority: 0,
            audio: AudioRecording::default(),
            answer_count: 0,
            qc_batch_id: None,
            is_sample: false,
            created_at: None,
        }
    }

    pub fn partition(mut self, ac: impl Into<String>) -> Self {
        self.partition_key = Some(ac.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn audio(mut self, audio: AudioRecording) -> Self {
        self.audio = audio;
        self
    }

    pub fn answers(mut self, count: u32) -> Self {
        self.answer_count = count;
        self
    }

    pub fn qc_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.qc_batch_id = Some(batch_id.into());
        self
    }

    pub fn sample(mut self, is_sample: bool) -> Self {
        self.is_sample = is_sample;
        self
    }

    /// Override the creation time (backfills; defaults to now).
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub(crate) fn build(self, now: DateTime<Utc>) -> SurveyResponse {
        let created_at = self.created_at.unwrap_or(now);
        SurveyResponse {
            id: WorkItemId::new(),
            survey_id: self.survey_id,
            interviewer_id: self.interviewer_id,
            interview_mode: self.interview_mode,
            status: ReviewStatus::PendingApproval,
            partition_key: self.partition_key,
            priority: self.priority,
            audio: self.audio,
            answer_count: self.answer_count,
            qc_batch_id: self.qc_batch_id,
            is_sample: self.is_sample,
            lease: None,
            verification: None,
            created_at,
            updated_at: now,
        }
    }
}
