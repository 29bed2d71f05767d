//! Available-assignment view maintenance and the eligibility report.
//!
//! The view is a cache. `refresh_item` keeps one row in step with its
//! source record after every mutation; `rebuild_view` regenerates a whole
//! domain from scratch and is safe to run at any time.

use std::collections::BTreeMap;

use opentelemetry::KeyValue;
use serde::Serialize;
use tracing::{debug, info};

use super::Engine;
use crate::eligibility::{self, Ineligible};
use crate::error::{Error, Result};
use crate::model::*;
use crate::telemetry::metrics;

/// Read-only snapshot of why open items are or are not offerable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EligibilityReport {
    /// Non-terminal items examined.
    pub open: usize,
    /// Offerable right now.
    pub eligible: usize,
    /// Listed but under a live lease.
    pub leased: usize,
    /// Counts per ineligibility reason.
    pub ineligible: BTreeMap<String, usize>,
}

impl Engine {
    /// Bring one view row in line with its source record.
    pub async fn refresh_item(&self, work: WorkRef) -> Result<()> {
        let item = match self.load_item(work).await {
            Ok(item) => item,
            Err(Error::NotFound(_)) => return self.store.delete_view_row(work).await,
            Err(e) => return Err(e),
        };

        if eligibility::is_listed(&item) {
            let row = AvailableAssignment::for_item(&item, self.effective_priority(&item), self.now());
            self.store.upsert_view_row(&row).await
        } else {
            self.store.delete_view_row(work).await
        }
    }

    /// Regenerate the view for `domain` (one survey, or all when `None`).
    /// Returns the number of rows written.
    pub async fn rebuild_view(&self, domain: Domain, survey_id: Option<&str>) -> Result<usize> {
        let now = self.now();
        let rows: Vec<AvailableAssignment> = self
            .open_items(domain, survey_id)
            .await?
            .iter()
            .filter(|item| eligibility::is_listed(item))
            .map(|item| AvailableAssignment::for_item(item, self.effective_priority(item), now))
            .collect();

        self.store.replace_view(domain, survey_id, &rows).await?;
        metrics::view_rows_rebuilt().add(rows.len() as u64, &[KeyValue::new("domain", domain.as_str())]);
        debug!(%domain, survey_id = ?survey_id, rows = rows.len(), "view rebuilt");
        Ok(rows.len())
    }

    /// Apply the eligibility filter to every open item without touching
    /// any state.
    pub async fn eligibility_report(
        &self,
        domain: Domain,
        survey_id: Option<&str>,
    ) -> Result<EligibilityReport> {
        let now = self.now();
        let mut report = EligibilityReport::default();

        for item in self.open_items(domain, survey_id).await? {
            report.open += 1;
            match eligibility::check(&item, now) {
                Ok(()) => report.eligible += 1,
                Err(Ineligible::Leased) => report.leased += 1,
                Err(reason) => *report.ineligible.entry(reason.to_string()).or_default() += 1,
            }
        }

        info!(
            %domain,
            open = report.open,
            eligible = report.eligible,
            leased = report.leased,
            "eligibility report"
        );
        Ok(report)
    }

    async fn open_items(&self, domain: Domain, survey_id: Option<&str>) -> Result<Vec<WorkItem>> {
        Ok(match domain {
            Domain::Review => self
                .store
                .list_pending_responses(survey_id)
                .await?
                .into_iter()
                .map(WorkItem::Review)
                .collect(),
            Domain::Call => self
                .store
                .list_open_queue_entries(survey_id)
                .await?
                .into_iter()
                .map(WorkItem::Call)
                .collect(),
        })
    }
}
