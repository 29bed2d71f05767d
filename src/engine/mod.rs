//! The assignment engine: leases, review decisions, call attempts,
//! partition restrictions and the available-assignment view.
//!
//! `Engine` is stateless apart from its configuration; all shared state
//! lives behind [`WorkStore`], whose conditional updates are the only
//! source of mutual exclusion. Any number of engines may run against the
//! same store.

pub mod attempts;
pub mod control;
pub mod lease;
pub mod partition;
pub mod recording;
pub mod review;
pub mod view;

pub use attempts::WebhookOutcome;
pub use control::BackgroundJobs;
pub use lease::ReclaimReport;
pub use recording::{
    FsRecordingSink, HttpRecordingFetcher, RecordingFetcher, RecordingSink, UploadReport,
};
pub use view::EligibilityReport;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::{EnginePolicy, PriorityMap};
use crate::error::Result;
use crate::model::*;
use crate::store::WorkStore;

pub struct Engine {
    store: Arc<dyn WorkStore>,
    policy: EnginePolicy,
    clock: Arc<dyn Clock>,
    priorities: PriorityMap,
}

impl Engine {
    pub fn new(store: Arc<dyn WorkStore>, policy: EnginePolicy) -> Self {
        Self {
            store,
            policy,
            clock: Arc::new(SystemClock),
            priorities: PriorityMap::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Rank call-domain rows by AC using `priorities`.
    pub fn with_priorities(mut self, priorities: PriorityMap) -> Self {
        self.priorities = priorities;
        self
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn WorkStore> {
        &self.store
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Accept a response from the interview-submission pipeline.
    pub async fn ingest_response(&self, new: NewSurveyResponse) -> Result<SurveyResponse> {
        let response = new.build(self.now());
        self.store.insert_response(&response).await?;
        self.refresh_item(WorkRef::new(Domain::Review, response.id))
            .await?;
        info!(
            work_item_id = %response.id,
            survey_id = %response.survey_id,
            mode = response.interview_mode.as_str(),
            "response ingested"
        );
        Ok(response)
    }

    /// Accept a contact from the contact-list loader. Contacts without a
    /// phone number or AC are rejected.
    pub async fn ingest_contact(&self, new: NewQueueEntry) -> Result<RespondentQueueEntry> {
        let entry = new.build(self.now())?;
        self.store.insert_queue_entry(&entry).await?;
        self.refresh_item(WorkRef::new(Domain::Call, entry.id)).await?;
        info!(
            work_item_id = %entry.id,
            survey_id = %entry.survey_id,
            ac = %entry.contact.partition_key,
            "contact queued"
        );
        Ok(entry)
    }

    /// Move a review item into or out of a QC sampling batch.
    pub async fn set_qc_batch(
        &self,
        id: WorkItemId,
        batch_id: Option<&str>,
        is_sample: bool,
    ) -> Result<()> {
        self.store
            .set_qc_batch(id, batch_id, is_sample, self.now())
            .await?;
        self.refresh_item(WorkRef::new(Domain::Review, id)).await
    }

    /// Read the source-of-truth record behind a work reference.
    pub async fn load_item(&self, work: WorkRef) -> Result<WorkItem> {
        Ok(match work.domain {
            Domain::Review => WorkItem::Review(self.store.get_response(work.id).await?),
            Domain::Call => WorkItem::Call(self.store.get_queue_entry(work.id).await?),
        })
    }

    pub(crate) fn effective_priority(&self, item: &WorkItem) -> i32 {
        match item {
            WorkItem::Review(r) => r.priority,
            WorkItem::Call(c) => self
                .priorities
                .effective(Some(&c.contact.partition_key), c.priority),
        }
    }
}
