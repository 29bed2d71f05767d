//! Attempt tracker: the call-domain state machine.
//!
//! ```text
//! pending --lease--> assigned --start_call--> calling
//!    ^                  |                        |
//!    +---- retryable ---+------------------------+
//!                       |                        |
//!                       +--> completed / abandoned
//! ```
//!
//! Every attempt is recorded by the lease holder (directly or through the
//! provider webhook), clears the lease and moves the entry per
//! [`disposition_for`].

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Engine;
use crate::error::{Error, Result};
use crate::model::*;
use crate::provider::ProviderEvent;
use crate::telemetry::metrics;

/// What `handle_provider_event` did with a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// No call record for this provider call id.
    UnknownCall,
    /// Status stored; no attempt was due (an intermediate status, already
    /// recorded, or the dialler no longer holds the entry).
    StatusRecorded,
    /// Status stored and an attempt recorded on the queue entry.
    AttemptRecorded(CallDisposition),
}

/// Where an entry goes after attempt number `attempt_number` ends with
/// `outcome`.
pub fn disposition_for(
    outcome: CallOutcome,
    attempt_number: u32,
    retry_ceiling: u32,
    notes: Option<String>,
) -> CallDisposition {
    if outcome.is_success() {
        CallDisposition::Completed
    } else if !outcome.is_retryable() {
        CallDisposition::Abandoned {
            reason: outcome.as_str().to_string(),
            notes,
        }
    } else if attempt_number >= retry_ceiling {
        CallDisposition::Abandoned {
            reason: ABANDON_MAX_ATTEMPTS.to_string(),
            notes,
        }
    } else {
        CallDisposition::Pending
    }
}

impl Engine {
    /// The holder starts dialling: assigned → calling. Records the
    /// provider call id so webhooks can find the entry, and restarts the
    /// lease so staleness is measured from the dial.
    pub async fn start_call(
        &self,
        id: WorkItemId,
        worker_id: &str,
        provider_call_id: &str,
        from_number: Option<String>,
    ) -> Result<CatiCall> {
        let now = self.now();
        let entry = self.store.get_queue_entry(id).await?;

        entry.status.check_transition(CallStatus::Calling)?;
        if !entry.is_leased_by(worker_id, now) {
            return Err(lease_conflict(&entry, now));
        }

        let expires_at = now + self.policy.lease_duration(Domain::Call);
        if !self
            .store
            .mark_calling(id, worker_id, expires_at, now)
            .await?
        {
            let current = self.store.get_queue_entry(id).await?;
            return Err(lease_conflict(&current, now));
        }

        let call = CatiCall {
            id: Uuid::new_v4(),
            provider_call_id: provider_call_id.to_string(),
            queue_entry_id: id,
            survey_id: entry.survey_id.clone(),
            attempted_by: worker_id.to_string(),
            from_number,
            to_number: entry.contact.phone.clone(),
            duration_secs: None,
            provider_status: None,
            webhook_received_at: None,
            recording_url: None,
            upload: RecordingUpload::default(),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_call_record(&call).await?;
        self.refresh_item(WorkRef::new(Domain::Call, id)).await?;

        info!(
            work_item_id = %id,
            worker_id,
            provider_call_id,
            attempt = entry.current_attempt_number + 1,
            "call started"
        );
        Ok(call)
    }

    /// Record the result of one dial. Only the live lease holder may
    /// record; the entry's lease is cleared either way it goes.
    pub async fn record_attempt(
        &self,
        id: WorkItemId,
        worker_id: &str,
        outcome: CallOutcome,
        provider_call_id: Option<String>,
        notes: Option<String>,
    ) -> Result<CallDisposition> {
        let now = self.now();
        let entry = self.store.get_queue_entry(id).await?;

        if entry.status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: entry.status.to_string(),
                to: format!("attempt ({outcome})"),
            });
        }
        if !entry.is_leased_by(worker_id, now) {
            return Err(lease_conflict(&entry, now));
        }

        let attempt_number = entry.current_attempt_number + 1;
        let disposition = disposition_for(
            outcome,
            attempt_number,
            self.policy.call_retry_ceiling,
            notes.clone(),
        );
        entry.status.check_transition(disposition.target_status())?;
        let attempt = CallAttempt {
            attempt_number,
            attempted_at: now,
            attempted_by: worker_id.to_string(),
            outcome,
            provider_call_id,
            notes,
        };

        if !self
            .store
            .apply_call_attempt(id, worker_id, &attempt, &disposition, now)
            .await?
        {
            let current = self.store.get_queue_entry(id).await?;
            return Err(lease_conflict(&current, now));
        }

        self.refresh_item(WorkRef::new(Domain::Call, id)).await?;
        info!(
            work_item_id = %id,
            worker_id,
            attempt = attempt_number,
            outcome = %outcome,
            next = disposition.label(),
            "call attempt recorded"
        );
        metrics::call_attempts().add(
            1,
            &[
                KeyValue::new("outcome", outcome.as_str()),
                KeyValue::new("disposition", disposition.label()),
            ],
        );
        Ok(disposition)
    }

    /// Apply a provider status callback.
    ///
    /// The status, numbers, duration and any recording URL are always
    /// stored on the call record. If the status settles an attempt, the
    /// dialler still holds the entry and no attempt for this call exists
    /// yet, the callback also records the attempt.
    pub async fn handle_provider_event(&self, event: &ProviderEvent) -> Result<WebhookOutcome> {
        let Some(call) = self.store.get_call_record(&event.provider_call_id).await? else {
            warn!(provider_call_id = %event.provider_call_id, "webhook for unknown call");
            return Ok(WebhookOutcome::UnknownCall);
        };

        self.store.update_provider_status(event).await?;

        let Some(outcome) = event.status.attempt_outcome() else {
            debug!(
                provider_call_id = %call.provider_call_id,
                raw_status = ?event.raw_status,
                "webhook status settles no attempt"
            );
            return Ok(WebhookOutcome::StatusRecorded);
        };

        let entry = self.store.get_queue_entry(call.queue_entry_id).await?;
        if entry.has_attempt_for_call(&call.provider_call_id)
            || !entry.is_leased_by(&call.attempted_by, self.now())
        {
            info!(
                provider_call_id = %call.provider_call_id,
                status = %event.status,
                "webhook status stored"
            );
            return Ok(WebhookOutcome::StatusRecorded);
        }

        let notes = event
            .raw_status
            .as_ref()
            .map(|raw| format!("provider status: {raw}"));
        match self
            .record_attempt(
                entry.id,
                &call.attempted_by,
                outcome,
                Some(call.provider_call_id.clone()),
                notes,
            )
            .await
        {
            Ok(disposition) => Ok(WebhookOutcome::AttemptRecorded(disposition)),
            Err(Error::LeaseConflict { holder, .. }) => {
                warn!(
                    provider_call_id = %call.provider_call_id,
                    holder = ?holder,
                    "webhook lost the entry before recording the attempt"
                );
                Ok(WebhookOutcome::StatusRecorded)
            }
            Err(e) => Err(e),
        }
    }
}

fn lease_conflict(entry: &RespondentQueueEntry, now: DateTime<Utc>) -> Error {
    Error::LeaseConflict {
        domain: Domain::Call,
        id: entry.id,
        holder: entry
            .lease()
            .filter(|l| l.is_live(now))
            .map(|l| l.holder),
    }
}
