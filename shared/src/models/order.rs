//! Orders, payments and withdrawals touched by settlement

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnknownVariant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Validated,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Validated => "VALIDATED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Status after a confirmed payment: only PENDING is promoted
    pub fn after_payment(self) -> Self {
        match self {
            OrderStatus::Pending => OrderStatus::Validated,
            other => other,
        }
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "VALIDATED" => Ok(OrderStatus::Validated),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            _ => Err(UnknownVariant::new("order status", s)),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unpaid,
    Partial,
    Paid,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "UNPAID",
            PaymentStatus::Partial => "PARTIAL",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNPAID" => Ok(PaymentStatus::Unpaid),
            "PARTIAL" => Ok(PaymentStatus::Partial),
            "PAID" => Ok(PaymentStatus::Paid),
            "CANCELLED" => Ok(PaymentStatus::Cancelled),
            _ => Err(UnknownVariant::new("payment status", s)),
        }
    }
}

/// One line of an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub work_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Author of the work, resolved when the order is loaded
    pub author_id: Option<Uuid>,
}

impl OrderLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    /// Customer who placed the order
    pub user_id: Uuid,
    pub partner_id: Option<Uuid>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub remaining_amount: Decimal,
    pub full_payment_date: Option<DateTime<Utc>>,
    pub lines: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
}

/// Payment-related columns written back onto an order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPaymentUpdate {
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub amount_paid: Option<Decimal>,
    pub remaining_amount: Option<Decimal>,
    pub full_payment_date: Option<DateTime<Utc>>,
}

/// A settled payment fact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
    pub payment_reference: String,
    pub paid_at: DateTime<Utc>,
    pub recorded_by: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub payment_method: String,
    pub payment_reference: String,
    pub recorded_by: Uuid,
}

/// Which withdrawal ledger a payout refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalKind {
    Author,
    #[serde(rename = "representant")]
    Representative,
    Partner,
}

impl WithdrawalKind {
    /// Value carried in provider metadata and stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalKind::Author => "author",
            WithdrawalKind::Representative => "representant",
            WithdrawalKind::Partner => "partner",
        }
    }
}

impl FromStr for WithdrawalKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "author" => Ok(WithdrawalKind::Author),
            "representant" => Ok(WithdrawalKind::Representative),
            "partner" => Ok(WithdrawalKind::Partner),
            _ => Err(UnknownVariant::new("withdrawal type", s)),
        }
    }
}

impl fmt::Display for WithdrawalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Paid,
    Rejected,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Approved => "APPROVED",
            WithdrawalStatus::Paid => "PAID",
            WithdrawalStatus::Rejected => "REJECTED",
        }
    }
}

impl FromStr for WithdrawalStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(WithdrawalStatus::Pending),
            "APPROVED" => Ok(WithdrawalStatus::Approved),
            "PAID" => Ok(WithdrawalStatus::Paid),
            "REJECTED" => Ok(WithdrawalStatus::Rejected),
            _ => Err(UnknownVariant::new("withdrawal status", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub id: Uuid,
    pub kind: WithdrawalKind,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    pub rejection_reason: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payout_reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_payment_promotes_only_pending() {
        assert_eq!(OrderStatus::Pending.after_payment(), OrderStatus::Validated);
        assert_eq!(OrderStatus::Shipped.after_payment(), OrderStatus::Shipped);
        assert_eq!(OrderStatus::Cancelled.after_payment(), OrderStatus::Cancelled);
    }

    #[test]
    fn test_withdrawal_kind_parsing() {
        assert_eq!("author".parse::<WithdrawalKind>().unwrap(), WithdrawalKind::Author);
        assert_eq!(
            "representant".parse::<WithdrawalKind>().unwrap(),
            WithdrawalKind::Representative
        );
        assert!("designer".parse::<WithdrawalKind>().is_err());
    }

    #[test]
    fn test_line_total() {
        let line = OrderLine {
            work_id: Uuid::new_v4(),
            quantity: 5,
            unit_price: Decimal::from(1000),
            author_id: None,
        };
        assert_eq!(line.line_total(), Decimal::from(5000));
    }
}
