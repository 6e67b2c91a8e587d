//! Delivery note (goods-issue document) models and lifecycle
//!
//! A delivery note authorises the release of an order's books from the
//! warehouse. Its lifecycle is a closed state machine:
//!
//! ```text
//! PENDING --validate--> VALIDATED --control--> CONTROLLED --complete--> COMPLETED
//!    \                      |                      |
//!     `-------------------cancel------------------'--> CANCELLED
//! ```
//!
//! Every transition goes through [`DeliveryNoteStatus::apply`], whose match
//! is exhaustive so that a new state cannot be added without deciding every
//! transition out of it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::UnknownVariant;

/// Prefix shared by every delivery-note reference
pub const DELIVERY_NOTE_PREFIX: &str = "BS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryNoteStatus {
    Pending,
    Validated,
    Controlled,
    Completed,
    Cancelled,
}

/// Transition requested on a delivery note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryNoteAction {
    Validate,
    Control,
    Complete,
    Cancel,
}

impl DeliveryNoteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryNoteAction::Validate => "validate",
            DeliveryNoteAction::Control => "control",
            DeliveryNoteAction::Complete => "complete",
            DeliveryNoteAction::Cancel => "cancel",
        }
    }
}

impl FromStr for DeliveryNoteAction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validate" => Ok(DeliveryNoteAction::Validate),
            "control" => Ok(DeliveryNoteAction::Control),
            "complete" => Ok(DeliveryNoteAction::Complete),
            "cancel" => Ok(DeliveryNoteAction::Cancel),
            _ => Err(UnknownVariant::new("delivery note action", s)),
        }
    }
}

/// An illegal transition, carrying enough context for an operator message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {action} a delivery note in status {from}")]
pub struct TransitionError {
    pub from: DeliveryNoteStatus,
    pub action: DeliveryNoteAction,
}

impl TransitionError {
    /// Operator-facing message naming the state the note must be in
    pub fn message_en(&self) -> String {
        match (self.action, self.from) {
            (DeliveryNoteAction::Validate, _) => {
                "Delivery note must be pending to be validated".to_string()
            }
            (DeliveryNoteAction::Control, _) => {
                "Delivery note must be validated before being controlled".to_string()
            }
            (DeliveryNoteAction::Complete, _) => {
                "Delivery note must be controlled before being completed".to_string()
            }
            (DeliveryNoteAction::Cancel, DeliveryNoteStatus::Cancelled) => {
                "Delivery note is already cancelled".to_string()
            }
            (DeliveryNoteAction::Cancel, _) => {
                "A completed delivery note cannot be cancelled".to_string()
            }
        }
    }

    pub fn message_fr(&self) -> String {
        match (self.action, self.from) {
            (DeliveryNoteAction::Validate, _) => {
                "Le bon doit être en attente pour être validé".to_string()
            }
            (DeliveryNoteAction::Control, _) => {
                "Le bon doit être validé avant d'être contrôlé".to_string()
            }
            (DeliveryNoteAction::Complete, _) => {
                "Le bon doit être contrôlé avant d'être complété".to_string()
            }
            (DeliveryNoteAction::Cancel, DeliveryNoteStatus::Cancelled) => {
                "Le bon est déjà annulé".to_string()
            }
            (DeliveryNoteAction::Cancel, _) => {
                "Un bon complété ne peut pas être annulé".to_string()
            }
        }
    }
}

impl DeliveryNoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryNoteStatus::Pending => "PENDING",
            DeliveryNoteStatus::Validated => "VALIDATED",
            DeliveryNoteStatus::Controlled => "CONTROLLED",
            DeliveryNoteStatus::Completed => "COMPLETED",
            DeliveryNoteStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryNoteStatus::Completed | DeliveryNoteStatus::Cancelled
        )
    }

    /// Resolve the status reached by applying `action`
    pub fn apply(self, action: DeliveryNoteAction) -> Result<Self, TransitionError> {
        use DeliveryNoteAction as A;
        use DeliveryNoteStatus as S;

        let next = match (self, action) {
            (S::Pending, A::Validate) => Some(S::Validated),
            (S::Validated, A::Control) => Some(S::Controlled),
            (S::Controlled, A::Complete) => Some(S::Completed),
            (S::Pending | S::Validated | S::Controlled, A::Cancel) => Some(S::Cancelled),
            (S::Pending, A::Control | A::Complete) => None,
            (S::Validated, A::Validate | A::Complete) => None,
            (S::Controlled, A::Validate | A::Control) => None,
            (S::Completed | S::Cancelled, _) => None,
        };

        next.ok_or(TransitionError { from: self, action })
    }
}

impl FromStr for DeliveryNoteStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(DeliveryNoteStatus::Pending),
            "VALIDATED" => Ok(DeliveryNoteStatus::Validated),
            "CONTROLLED" => Ok(DeliveryNoteStatus::Controlled),
            "COMPLETED" => Ok(DeliveryNoteStatus::Completed),
            "CANCELLED" => Ok(DeliveryNoteStatus::Cancelled),
            _ => Err(UnknownVariant::new("delivery note status", s)),
        }
    }
}

impl fmt::Display for DeliveryNoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DeliveryNoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details captured when a note is validated
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationDetails {
    #[serde(rename = "motif")]
    pub reason: Option<String>,
    pub destination: Option<String>,
    #[serde(rename = "etatLivres")]
    pub book_condition: Option<String>,
    pub transport: Option<String>,
    #[serde(rename = "datePrevue")]
    pub planned_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryNote {
    pub id: Uuid,
    pub reference: String,
    pub order_id: Uuid,
    pub status: DeliveryNoteStatus,
    pub period: Option<String>,
    pub notes: Option<String>,
    pub generated_by: Uuid,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<DateTime<Utc>>,
    pub controlled_by: Option<Uuid>,
    pub controlled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub validation: ValidationDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeliveryNote {
    pub reference: String,
    pub order_id: Uuid,
    pub period: Option<String>,
    pub notes: Option<String>,
    pub generated_by: Uuid,
}

/// List filters for delivery notes
#[derive(Debug, Clone, Default)]
pub struct DeliveryNoteFilter {
    pub status: Option<DeliveryNoteStatus>,
    pub period: Option<String>,
    pub search: Option<String>,
}

/// Reference prefix for a given year, e.g. `BS-2026-`
pub fn delivery_note_prefix(year: i32) -> String {
    format!("{}-{}-", DELIVERY_NOTE_PREFIX, year)
}

/// Generate a delivery-note reference: BS-YYYY-NNNN
pub fn delivery_note_reference(year: i32, sequence: i64) -> String {
    format!("{}{:04}", delivery_note_prefix(year), sequence)
}
