//! Error handling for the book ledger backend
//!
//! Provides consistent error responses in English and French

use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use shared::models::TransitionError;
use shared::ledger::LedgerError;
use shared::UnknownVariant;
use thiserror::Error;

use crate::store::StoreError;

static DIAGNOSTICS: AtomicBool = AtomicBool::new(false);

/// Include internal error detail in 500 responses (never in production)
pub fn set_diagnostics(enabled: bool) {
    DIAGNOSTICS.store(enabled, Ordering::Relaxed);
}

fn diagnostics_enabled() -> bool {
    DIAGNOSTICS.load(Ordering::Relaxed)
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String, message_fr: String },

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Validation errors
    #[error("Validation error: {message}")]
    Validation {
        field: String,
        message: String,
        message_fr: String,
    },

    #[error("Duplicate entry: {message}")]
    DuplicateEntry {
        resource: String,
        message: String,
        message_fr: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business rule errors
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    // Storage errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Validation error on a single field with both translations
    pub fn validation(field: &str, message: &str, message_fr: &str) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.to_string(),
            message_fr: message_fr.to_string(),
        }
    }

    pub fn missing_field(field: &str) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: format!("{} is required", field),
            message_fr: format!("Le champ {} est requis", field),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => AppError::DatabaseError(e),
            StoreError::UniqueViolation(constraint) => AppError::Conflict(constraint),
            StoreError::Corrupt(msg) => AppError::Internal(msg),
        }
    }
}

impl From<UnknownVariant> for AppError {
    fn from(err: UnknownVariant) -> Self {
        AppError::Validation {
            field: err.kind.replace(' ', "_"),
            message: err.to_string(),
            message_fr: format!("Valeur inconnue pour {} : {}", err.kind, err.value),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<(&str, String)> = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let detail = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("{} is invalid", field));
                (field, detail)
            })
            .collect();
        fields.sort();

        match fields.into_iter().next() {
            Some((field, message)) => AppError::Validation {
                field: field.to_string(),
                message_fr: format!("Le champ {} est invalide", field),
                message,
            },
            None => AppError::validation("body", "Invalid request body", "Requête invalide"),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message_en: String,
    pub message_fr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: &str, message_en: impl Into<String>, message_fr: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message_en: message_en.into(),
            message_fr: message_fr.into(),
            field: None,
            detail: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

fn ledger_detail(err: &LedgerError) -> ErrorDetail {
    match err {
        LedgerError::InvalidQuantity(msg) => {
            ErrorDetail::new("VALIDATION_ERROR", *msg, "La quantité doit être un entier positif")
                .with_field("quantity")
        }
        LedgerError::InsufficientStock {
            available,
            requested,
        } => ErrorDetail::new(
            "INSUFFICIENT_STOCK",
            format!(
                "Insufficient stock: {} available, {} requested",
                available, requested
            ),
            format!(
                "Stock insuffisant : {} disponible(s), {} demandé(s)",
                available, requested
            ),
        ),
        LedgerError::ExceedsAvailable {
            available,
            requested,
        } => ErrorDetail::new(
            "INSUFFICIENT_STOCK",
            format!(
                "Sale exceeds partner stock: {} available, {} requested",
                available, requested
            ),
            format!(
                "Vente supérieure au stock partenaire : {} disponible(s), {} demandé(s)",
                available, requested
            ),
        ),
        LedgerError::ExceedsNetSold {
            net_sold,
            requested,
        } => ErrorDetail::new(
            "INVALID_RETURN",
            format!(
                "Return exceeds quantity sold: {} sold, {} returned",
                net_sold, requested
            ),
            format!(
                "Retour supérieur à la quantité vendue : {} vendu(s), {} retourné(s)",
                net_sold, requested
            ),
        ),
        LedgerError::InvalidCount(counted) => ErrorDetail::new(
            "VALIDATION_ERROR",
            format!("Counted stock cannot be negative: {}", counted),
            format!("Le stock compté ne peut pas être négatif : {}", counted),
        )
        .with_field("physicalStock"),
        LedgerError::NotReversible(source) => ErrorDetail::new(
            "MOVEMENT_LOCKED",
            format!(
                "{} movements are tied to another record and cannot be deleted",
                source
            ),
            format!(
                "Les mouvements {} sont liés à un autre enregistrement et ne peuvent pas être supprimés",
                source
            ),
        ),
    }
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotReversible(_) => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match &self {
            AppError::Unauthorized {
                message,
                message_fr,
            } => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("UNAUTHORIZED", message.clone(), message_fr.clone()),
            ),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new(
                    "INVALID_SIGNATURE",
                    "Invalid webhook signature",
                    "Signature du webhook invalide",
                ),
            ),
            AppError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                ErrorDetail::new("FORBIDDEN", msg.clone(), "Accès refusé"),
            ),
            AppError::Validation {
                field,
                message,
                message_fr,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", message.clone(), message_fr.clone())
                    .with_field(field.clone()),
            ),
            AppError::DuplicateEntry {
                resource,
                message,
                message_fr,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("DUPLICATE_ENTRY", message.clone(), message_fr.clone())
                    .with_field(resource.clone()),
            ),
            AppError::Conflict(resource) => (
                StatusCode::CONFLICT,
                ErrorDetail::new(
                    "CONFLICT",
                    format!("Conflicting {} already exists", resource),
                    format!("Un enregistrement {} existe déjà", resource),
                ),
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new(
                    "NOT_FOUND",
                    format!("{} not found", resource),
                    format!("{} introuvable", resource),
                ),
            ),
            AppError::InvalidTransition(err) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("INVALID_TRANSITION", err.message_en(), err.message_fr()),
            ),
            AppError::Ledger(err) => (ledger_status(err), ledger_detail(err)),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new(
                    "DATABASE_ERROR",
                    "A database error occurred",
                    "Une erreur de base de données est survenue",
                ),
            ),
            AppError::Internal(_) | AppError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new(
                    "INTERNAL_ERROR",
                    "An internal server error occurred",
                    "Une erreur interne est survenue",
                ),
            ),
        };

        let mut error_detail = error_detail;
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
            if diagnostics_enabled() {
                error_detail.detail = Some(self.to_string());
            }
        } else {
            tracing::debug!(code = %error_detail.code, "request rejected: {}", self);
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
