//! Payment provider webhook
//!
//! The body is authenticated with an HMAC-SHA256 signature over the raw
//! bytes before it is parsed. Events that cannot be settled (unknown kind,
//! unknown order or withdrawal) are acknowledged so the provider stops
//! redelivering them.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use shared::models::{EnvelopeError, ProviderEvent};

use crate::error::{AppError, AppResult};
use crate::services::settlement::SettlementOutcome;
use crate::services::SettlementService;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<SettlementOutcome>,
}

/// Hex HMAC-SHA256 of `body` under `secret`
pub fn compute_signature(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature, with or without a `sha256=` prefix
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Receive a provider event
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookAck>> {
    let webhook = &state.config.webhook;
    let signature = headers
        .get(webhook.signature_header.as_str())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_signature(&webhook.secret, &body, signature) {
        tracing::warn!(bytes = body.len(), "webhook rejected: invalid signature");
        return Err(AppError::InvalidSignature);
    }

    let envelope: ProviderEvent = serde_json::from_slice(&body).map_err(|err| {
        tracing::warn!(error = %err, "webhook rejected: malformed body");
        AppError::validation(
            "body",
            "Malformed webhook payload",
            "Contenu du webhook invalide",
        )
    })?;

    let event_name = envelope.event.clone();
    let event = match envelope.into_settlement_event() {
        Ok(Some(event)) => event,
        Ok(None) => {
            tracing::info!(event = %event_name, "webhook event not handled, ignoring");
            return Ok(Json(WebhookAck {
                success: true,
                outcome: None,
            }));
        }
        Err(err) => {
            tracing::warn!(event = %event_name, error = %err, "webhook rejected: incomplete event");
            return Err(envelope_error(err));
        }
    };

    let service = SettlementService::new(
        state.store.clone(),
        state.config.settlement.rate_defaults(),
    );
    let outcome = service.handle(event).await?;

    Ok(Json(WebhookAck {
        success: true,
        outcome: Some(outcome),
    }))
}

fn envelope_error(err: EnvelopeError) -> AppError {
    match err {
        EnvelopeError::MissingField(field) => AppError::missing_field(field),
        EnvelopeError::InvalidField { field, value } => AppError::Validation {
            field: field.to_string(),
            message: format!("Invalid value for {}: {}", field, value),
            message_fr: format!("Valeur invalide pour {} : {}", field, value),
        },
    }
}
