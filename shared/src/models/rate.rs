//! Rate rules and the settlement records computed from them

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// Granularity a rate rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateScope {
    Work,
    Author,
    Partner,
    Global,
}

impl RateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateScope::Work => "WORK",
            RateScope::Author => "AUTHOR",
            RateScope::Partner => "PARTNER",
            RateScope::Global => "GLOBAL",
        }
    }
}

impl FromStr for RateScope {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WORK" => Ok(RateScope::Work),
            "AUTHOR" => Ok(RateScope::Author),
            "PARTNER" => Ok(RateScope::Partner),
            "GLOBAL" => Ok(RateScope::Global),
            _ => Err(UnknownVariant::new("rate scope", s)),
        }
    }
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a rule feeds royalty or rebate computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateKind {
    Royalty,
    Rebate,
}

impl RateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateKind::Royalty => "ROYALTY",
            RateKind::Rebate => "REBATE",
        }
    }
}

impl FromStr for RateKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROYALTY" => Ok(RateKind::Royalty),
            "REBATE" => Ok(RateKind::Rebate),
            _ => Err(UnknownVariant::new("rate kind", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RateRule {
    pub id: Uuid,
    pub kind: RateKind,
    pub scope: RateScope,
    /// Work, author or partner id; `None` for GLOBAL rules
    pub scope_id: Option<Uuid>,
    /// Percentage, e.g. `10` for 10%
    pub rate: Decimal,
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl RateRule {
    /// Active and inside its validity window at `at`
    pub fn applies_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active
            && self.valid_from.map_or(true, |from| from <= at)
            && self.valid_until.map_or(true, |until| at <= until)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Royalty {
    pub id: Uuid,
    pub work_id: Uuid,
    /// Author the royalty is owed to
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub rate: Decimal,
    pub approved: bool,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewRoyalty {
    pub work_id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebateStatus {
    Pending,
    Validated,
    Paid,
}

impl RebateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebateStatus::Pending => "PENDING",
            RebateStatus::Validated => "VALIDATED",
            RebateStatus::Paid => "PAID",
        }
    }
}

impl FromStr for RebateStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RebateStatus::Pending),
            "VALIDATED" => Ok(RebateStatus::Validated),
            "PAID" => Ok(RebateStatus::Paid),
            _ => Err(UnknownVariant::new("rebate status", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartnerRebate {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub order_id: Uuid,
    pub work_id: Uuid,
    pub amount: Decimal,
    pub rate: Decimal,
    pub status: RebateStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPartnerRebate {
    pub partner_id: Uuid,
    pub order_id: Uuid,
    pub work_id: Uuid,
    pub amount: Decimal,
    pub rate: Decimal,
}
