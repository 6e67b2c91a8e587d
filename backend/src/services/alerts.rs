//! Stock alert reconciliation

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use shared::alerts::{plan_reconciliation, unresolved_keys};
use shared::models::StockAlert;
use uuid::Uuid;

use crate::error::AppResult;
use crate::store::Store;

#[derive(Clone)]
pub struct AlertService {
    store: Arc<dyn Store>,
}

/// Writes performed by one reconciliation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub created: u64,
    pub resolved: u64,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.resolved == 0
    }
}

impl AlertService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Open and resolve alerts so they match current stock
    ///
    /// Works and their unresolved alerts are loaded in one pass; resolutions
    /// are applied per alert type and creations in a single batch that skips
    /// duplicates left by an overlapping run.
    pub async fn reconcile(&self) -> AppResult<ReconcileSummary> {
        let mut unit = self.store.begin().await?;

        let works = unit.all_works().await?;
        let work_ids: Vec<Uuid> = works.iter().map(|w| w.id).collect();
        let open = unit.unresolved_alerts(&work_ids).await?;
        let plan = plan_reconciliation(&works, &unresolved_keys(&open));

        if plan.is_noop() {
            tracing::debug!(works = works.len(), "alert reconciliation: nothing to do");
            return Ok(ReconcileSummary::default());
        }

        let now = Utc::now();
        let mut summary = ReconcileSummary::default();
        for (alert_type, ids) in &plan.resolve {
            summary.resolved += unit.resolve_alerts(*alert_type, ids, now).await?;
        }
        summary.created = unit.insert_alerts(&plan.create).await?;

        unit.commit().await?;

        tracing::info!(
            created = summary.created,
            resolved = summary.resolved,
            "stock alerts reconciled"
        );

        Ok(summary)
    }

    /// Alerts after a reconciliation pass
    pub async fn current_alerts(&self, include_resolved: bool) -> AppResult<Vec<StockAlert>> {
        self.reconcile().await?;
        Ok(self.store.list_alerts(include_resolved).await?)
    }
}
