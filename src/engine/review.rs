//! QC review decisions.

use opentelemetry::KeyValue;
use tracing::info;

use super::Engine;
use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::metrics;

impl Engine {
    /// Approve or reject a response the reviewer currently holds.
    ///
    /// The write only applies while `reviewer_id` holds a live lease and
    /// the response is still pending, so a reviewer whose lease expired
    /// and was taken over cannot overwrite the new holder's work.
    pub async fn submit_decision(
        &self,
        id: WorkItemId,
        reviewer_id: &str,
        decision: Decision,
    ) -> Result<SurveyResponse> {
        let now = self.now();
        let status = decision.outcome.target_status();
        let verification = Verification {
            reviewer_id: reviewer_id.to_string(),
            reviewed_at: now,
            criteria: decision.criteria,
            feedback: decision.feedback,
        };

        if !self
            .store
            .record_decision(id, reviewer_id, status, &verification, now)
            .await?
        {
            let current = self.store.get_response(id).await?;
            if current.status != ReviewStatus::PendingApproval {
                return Err(Error::InvalidTransition {
                    from: current.status.to_string(),
                    to: status.to_string(),
                });
            }
            return Err(Error::LeaseConflict {
                domain: Domain::Review,
                id,
                holder: current
                    .lease
                    .filter(|l| l.is_live(now))
                    .map(|l| l.holder),
            });
        }

        self.store
            .delete_view_row(WorkRef::new(Domain::Review, id))
            .await?;
        info!(work_item_id = %id, reviewer_id, status = %status, "review decision recorded");
        metrics::review_decisions().add(1, &[KeyValue::new("outcome", status.as_str())]);

        self.store.get_response(id).await
    }
}
