//! Payment provider webhook envelope
//!
//! The provider posts `{event, data}` with snake_case fields. The raw
//! envelope is parsed leniently, then narrowed into a [`SettlementEvent`]
//! whose variants carry exactly the fields each handler needs.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{UnknownVariant, WithdrawalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    PaymentSuccess,
    PaymentFailed,
    PaymentCancelled,
    PayoutSuccess,
    PayoutFailed,
}

impl ProviderEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderEventKind::PaymentSuccess => "payment.success",
            ProviderEventKind::PaymentFailed => "payment.failed",
            ProviderEventKind::PaymentCancelled => "payment.cancelled",
            ProviderEventKind::PayoutSuccess => "payout.success",
            ProviderEventKind::PayoutFailed => "payout.failed",
        }
    }
}

impl FromStr for ProviderEventKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment.success" => Ok(ProviderEventKind::PaymentSuccess),
            "payment.failed" => Ok(ProviderEventKind::PaymentFailed),
            "payment.cancelled" => Ok(ProviderEventKind::PaymentCancelled),
            "payout.success" => Ok(ProviderEventKind::PayoutSuccess),
            "payout.failed" => Ok(ProviderEventKind::PayoutFailed),
            _ => Err(UnknownVariant::new("provider event", s)),
        }
    }
}

impl fmt::Display for ProviderEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderMetadata {
    pub order_id: Option<String>,
    pub withdrawal_id: Option<String>,
    pub withdrawal_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderEventData {
    pub transaction_id: Option<String>,
    pub payout_id: Option<String>,
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub metadata: ProviderMetadata,
}

/// Raw webhook body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderEvent {
    pub event: String,
    #[serde(default)]
    pub data: ProviderEventData,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// A recognised provider event with its required fields present
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementEvent {
    PaymentSucceeded {
        transaction_id: String,
        order_id: Uuid,
        amount: Decimal,
    },
    PaymentFailed {
        transaction_id: String,
        order_id: Uuid,
    },
    PaymentCancelled {
        transaction_id: String,
        order_id: Uuid,
    },
    PayoutSucceeded {
        payout_id: String,
        withdrawal_id: Uuid,
        kind: WithdrawalKind,
    },
    PayoutFailed {
        payout_id: String,
        withdrawal_id: Uuid,
        kind: WithdrawalKind,
    },
}

impl SettlementEvent {
    pub fn kind(&self) -> ProviderEventKind {
        match self {
            SettlementEvent::PaymentSucceeded { .. } => ProviderEventKind::PaymentSuccess,
            SettlementEvent::PaymentFailed { .. } => ProviderEventKind::PaymentFailed,
            SettlementEvent::PaymentCancelled { .. } => ProviderEventKind::PaymentCancelled,
            SettlementEvent::PayoutSucceeded { .. } => ProviderEventKind::PayoutSuccess,
            SettlementEvent::PayoutFailed { .. } => ProviderEventKind::PayoutFailed,
        }
    }

    /// Provider transaction or payout id
    pub fn provider_id(&self) -> &str {
        match self {
            SettlementEvent::PaymentSucceeded { transaction_id, .. }
            | SettlementEvent::PaymentFailed { transaction_id, .. }
            | SettlementEvent::PaymentCancelled { transaction_id, .. } => transaction_id,
            SettlementEvent::PayoutSucceeded { payout_id, .. }
            | SettlementEvent::PayoutFailed { payout_id, .. } => payout_id,
        }
    }

    /// Key claimed once per provider transaction or payout, e.g. `payment:T1`
    ///
    /// The outcome kind is not part of the key: once T1 has settled as a
    /// failure, a later success for T1 is a duplicate and vice versa.
    pub fn idempotency_key(&self) -> String {
        let namespace = match self {
            SettlementEvent::PaymentSucceeded { .. }
            | SettlementEvent::PaymentFailed { .. }
            | SettlementEvent::PaymentCancelled { .. } => "payment",
            SettlementEvent::PayoutSucceeded { .. } | SettlementEvent::PayoutFailed { .. } => {
                "payout"
            }
        };
        format!("{}:{}", namespace, self.provider_id())
    }
}

impl ProviderEvent {
    /// Narrow the envelope into a typed event
    ///
    /// Returns `Ok(None)` for event kinds this service does not handle.
    pub fn into_settlement_event(self) -> Result<Option<SettlementEvent>, EnvelopeError> {
        let kind = match self.event.parse::<ProviderEventKind>() {
            Ok(kind) => kind,
            Err(_) => return Ok(None),
        };
        let data = self.data;

        let event = match kind {
            ProviderEventKind::PaymentSuccess => SettlementEvent::PaymentSucceeded {
                transaction_id: required(data.transaction_id, "transaction_id")?,
                order_id: required_uuid(data.metadata.order_id, "metadata.order_id")?,
                amount: data.amount.ok_or(EnvelopeError::MissingField("amount"))?,
            },
            ProviderEventKind::PaymentFailed => SettlementEvent::PaymentFailed {
                transaction_id: required(data.transaction_id, "transaction_id")?,
                order_id: required_uuid(data.metadata.order_id, "metadata.order_id")?,
            },
            ProviderEventKind::PaymentCancelled => SettlementEvent::PaymentCancelled {
                transaction_id: required(data.transaction_id, "transaction_id")?,
                order_id: required_uuid(data.metadata.order_id, "metadata.order_id")?,
            },
            ProviderEventKind::PayoutSuccess => SettlementEvent::PayoutSucceeded {
                payout_id: required(data.payout_id, "payout_id")?,
                withdrawal_id: required_uuid(
                    data.metadata.withdrawal_id,
                    "metadata.withdrawal_id",
                )?,
                kind: withdrawal_kind(data.metadata.withdrawal_type)?,
            },
            ProviderEventKind::PayoutFailed => SettlementEvent::PayoutFailed {
                payout_id: required(data.payout_id, "payout_id")?,
                withdrawal_id: required_uuid(
                    data.metadata.withdrawal_id,
                    "metadata.withdrawal_id",
                )?,
                kind: withdrawal_kind(data.metadata.withdrawal_type)?,
            },
        };

        Ok(Some(event))
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, EnvelopeError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(EnvelopeError::MissingField(field)),
    }
}

fn required_uuid(value: Option<String>, field: &'static str) -> Result<Uuid, EnvelopeError> {
    let raw = required(value, field)?;
    Uuid::parse_str(raw.trim()).map_err(|_| EnvelopeError::InvalidField { field, value: raw })
}

fn withdrawal_kind(value: Option<String>) -> Result<WithdrawalKind, EnvelopeError> {
    let field = "metadata.withdrawal_type";
    let raw = required(value, field)?;
    raw.parse()
        .map_err(|_| EnvelopeError::InvalidField { field, value: raw })
}
