//! Rate table loading for settlement

use chrono::{DateTime, Utc};
use shared::rates::{RateDefaults, RateTable};

use crate::error::AppResult;
use crate::store::UnitOfWork;

/// Load every active rule once and build the table in force at `at`
pub async fn load_rate_table(
    unit: &mut dyn UnitOfWork,
    at: DateTime<Utc>,
    defaults: RateDefaults,
) -> AppResult<RateTable> {
    let rules = unit.active_rate_rules().await?;
    let table = RateTable::new(rules, at, defaults);
    tracing::debug!(rules = table.len(), "rate table loaded");
    Ok(table)
}
