//! Warehouse stock models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

/// A published work and its central-warehouse stock counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Work {
    pub id: Uuid,
    pub title: String,
    pub isbn: Option<String>,
    pub author_id: Option<Uuid>,
    pub price: Decimal,
    /// Warehouse quantity, never negative
    pub stock: i32,
    pub physical_stock: i32,
    pub min_stock: i32,
    pub max_stock: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of stock movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    Inbound,
    Outbound,
    Correction,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Inbound => "INBOUND",
            MovementType::Outbound => "OUTBOUND",
            MovementType::Correction => "CORRECTION",
        }
    }
}

impl FromStr for MovementType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INBOUND" => Ok(MovementType::Inbound),
            "OUTBOUND" => Ok(MovementType::Outbound),
            "CORRECTION" => Ok(MovementType::Correction),
            _ => Err(UnknownVariant::new("movement type", s)),
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What wrote a movement
///
/// Only manual and inventory movements stand alone. The others are one half
/// of a paired effect (an allocation, a settled sale, a cancelled note) and
/// cannot be reversed on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementSource {
    #[default]
    Manual,
    Inventory,
    Allocation,
    Sale,
    NoteCancellation,
}

impl MovementSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementSource::Manual => "MANUAL",
            MovementSource::Inventory => "INVENTORY",
            MovementSource::Allocation => "ALLOCATION",
            MovementSource::Sale => "SALE",
            MovementSource::NoteCancellation => "NOTE_CANCELLATION",
        }
    }

    pub fn is_reversible(&self) -> bool {
        matches!(self, MovementSource::Manual | MovementSource::Inventory)
    }
}

impl FromStr for MovementSource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(MovementSource::Manual),
            "INVENTORY" => Ok(MovementSource::Inventory),
            "ALLOCATION" => Ok(MovementSource::Allocation),
            "SALE" => Ok(MovementSource::Sale),
            "NOTE_CANCELLATION" => Ok(MovementSource::NoteCancellation),
            _ => Err(UnknownVariant::new("movement source", s)),
        }
    }
}

impl fmt::Display for MovementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable stock movement fact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub id: Uuid,
    pub work_id: Uuid,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub source: MovementSource,
    /// Requested quantity, always positive
    pub quantity: i32,
    /// Signed change actually applied to `Work.stock` after clamping
    pub applied_delta: i32,
    pub reason: Option<String>,
    pub reference: Option<String>,
    pub performed_by: Option<Uuid>,
    pub is_correction: bool,
    pub partner_id: Option<Uuid>,
    pub unit_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// A movement about to be appended to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct NewMovement {
    pub work_id: Uuid,
    pub movement_type: MovementType,
    pub source: MovementSource,
    pub quantity: i32,
    pub applied_delta: i32,
    pub reason: Option<String>,
    pub reference: Option<String>,
    pub performed_by: Option<Uuid>,
    pub is_correction: bool,
    pub partner_id: Option<Uuid>,
    pub unit_price: Option<Decimal>,
}

/// Filters for the recent-movements projection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementFilter {
    pub work_id: Option<Uuid>,
    pub movement_type: Option<MovementType>,
    pub since: Option<DateTime<Utc>>,
}

/// Aggregate stock statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockStats {
    pub total_works: i64,
    pub total_stock: i64,
    pub total_value: Decimal,
    pub low_stock_items: i64,
    pub out_of_stock_items: i64,
    pub excess_stock_items: i64,
    pub rupture_rate: f64,
    pub rotation_rate: f64,
}

impl StockStats {
    /// Compute statistics from the current works and the outbound quantity
    /// moved over the trailing window
    pub fn compute(works: &[Work], window_outbound: i64) -> Self {
        let total_works = works.len() as i64;
        let total_stock: i64 = works.iter().map(|w| i64::from(w.stock)).sum();
        let total_value = works
            .iter()
            .map(|w| w.price * Decimal::from(w.stock))
            .sum();
        let low_stock_items = works
            .iter()
            .filter(|w| w.stock > 0 && w.stock <= w.min_stock)
            .count() as i64;
        let out_of_stock_items = works.iter().filter(|w| w.stock == 0).count() as i64;
        let excess_stock_items = works
            .iter()
            .filter(|w| matches!(w.max_stock, Some(max) if max > 0 && w.stock >= max))
            .count() as i64;

        let rupture_rate = if total_works > 0 {
            out_of_stock_items as f64 / total_works as f64
        } else {
            0.0
        };
        let rotation_rate = if total_stock > 0 {
            window_outbound.abs() as f64 / total_stock as f64
        } else {
            0.0
        };

        Self {
            total_works,
            total_stock,
            total_value,
            low_stock_items,
            out_of_stock_items,
            excess_stock_items,
            rupture_rate,
            rotation_rate,
        }
    }
}

/// Priority of a restock suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestockPriority {
    High,
    Medium,
}

/// A pending restock operation derived from a work at or below its minimum
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestockSuggestion {
    pub work_id: Uuid,
    pub title: String,
    pub stock: i32,
    pub min_stock: i32,
    pub max_stock: Option<i32>,
    pub suggested_quantity: i32,
    pub priority: RestockPriority,
}

impl RestockSuggestion {
    /// Returns `None` when the work is above its minimum stock
    pub fn for_work(work: &Work) -> Option<Self> {
        if work.stock > work.min_stock {
            return None;
        }

        let target = work
            .max_stock
            .unwrap_or(0)
            .max(work.min_stock.saturating_mul(2));
        let suggested_quantity = target.saturating_sub(work.stock).max(1);
        let priority = if work.stock == 0 || work.stock.saturating_mul(2) <= work.min_stock {
            RestockPriority::High
        } else {
            RestockPriority::Medium
        };

        Some(Self {
            work_id: work.id,
            title: work.title.clone(),
            stock: work.stock,
            min_stock: work.min_stock,
            max_stock: work.max_stock,
            suggested_quantity,
            priority,
        })
    }
}
