//! Lease manager: grant, heartbeat, release and reclaim.

use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{Instrument, debug, info, warn};

use super::Engine;
use crate::eligibility;
use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::metrics;
use crate::telemetry::spans::{record_state_transition, record_work_id, start_request_span};

/// What one expiry sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Items whose lapsed lease was cleared.
    pub reclaimed: Vec<WorkRef>,
    /// View rows flagged `expired` before the leases were cleared.
    pub view_rows_expired: u64,
}

impl Engine {
    /// Lease the best available item to `worker_id`, or `None` when nothing
    /// can be offered right now.
    ///
    /// Candidates come from the view in rank order, restricted to the
    /// worker's partitions. Each one is re-checked against its source
    /// record before the conditional lease write; a candidate lost to
    /// another worker is skipped and the next one tried, up to
    /// `max_selection_attempts`.
    pub async fn request_work(
        &self,
        worker_id: &str,
        domain: Domain,
        survey_id: &str,
    ) -> Result<Option<LeaseGrant>> {
        let span = start_request_span("request_work", domain.as_str(), worker_id);

        async {
            let started = Instant::now();
            let now = self.now();
            let partitions = self.partition_filter(worker_id, survey_id, domain).await?;
            let query = CandidateQuery {
                domain,
                survey_id: survey_id.to_string(),
                partitions,
                now,
                limit: self.policy.max_selection_attempts,
            };

            for row in self.store.view_candidates(&query).await? {
                let work = row.work_ref();
                let item = match self.load_item(work).await {
                    Ok(item) => item,
                    Err(Error::NotFound(_)) => {
                        contention(domain, "missing");
                        self.store.delete_view_row(work).await?;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                // The view may be stale; the source record decides.
                if let Err(reason) = eligibility::check(&item, now) {
                    debug!(work_item_id = %work.id, %reason, "candidate no longer eligible");
                    contention(domain, "ineligible");
                    self.refresh_item(work).await?;
                    continue;
                }
                if !query.partitions.admits(item.partition_key()) {
                    contention(domain, "ineligible");
                    self.refresh_item(work).await?;
                    continue;
                }

                let expires_at = now + self.policy.lease_duration(domain);
                if !self
                    .store
                    .try_acquire_lease(work, worker_id, now, expires_at)
                    .await?
                {
                    debug!(work_item_id = %work.id, "lost lease race, trying next candidate");
                    contention(domain, "cas_lost");
                    self.refresh_item(work).await?;
                    continue;
                }

                self.store
                    .upsert_view_row(&AvailableAssignment {
                        status: ViewStatus::Assigned,
                        lease_expires_at: Some(expires_at),
                        ..AvailableAssignment::for_item(&item, self.effective_priority(&item), now)
                    })
                    .await?;

                record_work_id(&span, &work.id);
                record_state_transition(&span, "available", "assigned");
                info!(
                    work_item_id = %work.id,
                    worker_id,
                    %domain,
                    survey_id,
                    %expires_at,
                    "lease granted"
                );
                metrics::leases_granted().add(
                    1,
                    &[
                        KeyValue::new("domain", domain.as_str()),
                        KeyValue::new("via", "request"),
                    ],
                );
                metrics::operation_duration_ms().record(
                    started.elapsed().as_secs_f64() * 1000.0,
                    &[KeyValue::new("operation", "request_work")],
                );

                return Ok(Some(LeaseGrant {
                    domain,
                    work_item_id: work.id,
                    worker_id: worker_id.to_string(),
                    expires_at,
                }));
            }

            debug!(worker_id, %domain, survey_id, "no work available");
            metrics::no_work().add(1, &[KeyValue::new("domain", domain.as_str())]);
            Ok(None)
        }
        .instrument(span.clone())
        .await
    }

    /// Give the item back. A no-op (returning `false`) unless `worker_id`
    /// is the holder.
    pub async fn release_lease(
        &self,
        domain: Domain,
        id: WorkItemId,
        worker_id: &str,
    ) -> Result<bool> {
        let work = WorkRef::new(domain, id);
        if !self.store.release_lease(work, worker_id, self.now()).await? {
            debug!(work_item_id = %id, worker_id, %domain, "release ignored: not the holder");
            return Ok(false);
        }

        self.refresh_item(work).await?;
        info!(work_item_id = %id, worker_id, %domain, "lease released");
        metrics::leases_released().add(1, &[KeyValue::new("domain", domain.as_str())]);
        Ok(true)
    }

    /// Heartbeat: push the expiry of a live lease held by `worker_id`.
    pub async fn extend_lease(
        &self,
        domain: Domain,
        id: WorkItemId,
        worker_id: &str,
    ) -> Result<LeaseGrant> {
        let work = WorkRef::new(domain, id);
        let now = self.now();
        let expires_at = now + self.policy.lease_duration(domain);

        if !self
            .store
            .extend_lease(work, worker_id, now, expires_at)
            .await?
        {
            let item = self.load_item(work).await?;
            return Err(Error::LeaseConflict {
                domain,
                id,
                holder: item.live_lease(now).map(|l| l.holder),
            });
        }

        self.refresh_item(work).await?;
        debug!(work_item_id = %id, worker_id, %expires_at, "lease extended");
        Ok(LeaseGrant {
            domain,
            work_item_id: id,
            worker_id: worker_id.to_string(),
            expires_at,
        })
    }

    /// Expiry sweep. Flags lapsed view rows, clears every expired lease
    /// and returns the affected items to the pool. Running it twice in a
    /// row reclaims nothing the second time.
    pub async fn reclaim_expired(&self) -> Result<ReclaimReport> {
        let now = self.now();
        let view_rows_expired = self.store.mark_expired_view_rows(now).await?;
        let reclaimed = self.store.reclaim_expired_leases(now).await?;

        for work in &reclaimed {
            self.refresh_item(*work).await?;
            metrics::leases_reclaimed().add(1, &[KeyValue::new("domain", work.domain.as_str())]);
        }

        if !reclaimed.is_empty() {
            info!(
                reclaimed = reclaimed.len(),
                view_rows_expired, "expired leases reclaimed"
            );
        }
        Ok(ReclaimReport {
            reclaimed,
            view_rows_expired,
        })
    }

    /// Admin override: lease a specific item to `worker_id`, bypassing
    /// ranking and partitions but not eligibility or exclusivity.
    pub async fn force_assign(
        &self,
        domain: Domain,
        id: WorkItemId,
        worker_id: &str,
    ) -> Result<LeaseGrant> {
        let work = WorkRef::new(domain, id);
        let now = self.now();
        let item = self.load_item(work).await?;

        if let Err(reason) = eligibility::check_listing(&item) {
            warn!(
                work_item_id = %id,
                worker_id,
                %domain,
                %reason,
                "force-assign rejected: item not eligible"
            );
            return Err(Error::EligibilityViolation {
                domain,
                id,
                reason: reason.to_string(),
            });
        }
        if let Some(lease) = item.live_lease(now) {
            return Err(Error::LeaseConflict {
                domain,
                id,
                holder: Some(lease.holder),
            });
        }

        let expires_at = now + self.policy.lease_duration(domain);
        if !self
            .store
            .try_acquire_lease(work, worker_id, now, expires_at)
            .await?
        {
            let current = self.load_item(work).await?;
            return Err(Error::LeaseConflict {
                domain,
                id,
                holder: current.live_lease(now).map(|l| l.holder),
            });
        }

        self.refresh_item(work).await?;
        warn!(work_item_id = %id, worker_id, %domain, "lease force-assigned");
        metrics::leases_granted().add(
            1,
            &[
                KeyValue::new("domain", domain.as_str()),
                KeyValue::new("via", "force"),
            ],
        );
        Ok(LeaseGrant {
            domain,
            work_item_id: id,
            worker_id: worker_id.to_string(),
            expires_at,
        })
    }
}

fn contention(domain: Domain, reason: &'static str) {
    metrics::lease_contention().add(
        1,
        &[
            KeyValue::new("domain", domain.as_str()),
            KeyValue::new("reason", reason),
        ],
    );
}
