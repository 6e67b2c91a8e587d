//! Partner consignment allocations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::available_quantity;

/// Consignment bookkeeping for one (partner, work) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub work_id: Uuid,
    pub allocated_quantity: i32,
    pub sold_quantity: i32,
    pub returned_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Allocation {
    /// A fresh, empty allocation for a pair that has never been stocked
    pub fn empty(partner_id: Uuid, work_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            partner_id,
            work_id,
            allocated_quantity: 0,
            sold_quantity: 0,
            returned_quantity: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn available(&self) -> i32 {
        available_quantity(
            self.allocated_quantity,
            self.sold_quantity,
            self.returned_quantity,
        )
    }

    /// Quantity sold and not yet returned
    pub fn net_sold(&self) -> i32 {
        (self.sold_quantity - self.returned_quantity).max(0)
    }
}

/// Allocation plus its derived availability, as served to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllocationView {
    #[serde(flatten)]
    pub allocation: Allocation,
    pub available_quantity: i32,
}

impl From<Allocation> for AllocationView {
    fn from(allocation: Allocation) -> Self {
        let available_quantity = allocation.available();
        Self {
            allocation,
            available_quantity,
        }
    }
}
