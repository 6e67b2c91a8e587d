//! HTTP handlers for warehouse stock endpoints

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use shared::models::{MovementFilter, MovementType, StockMovement};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::services::stock::{
    InventoryCountInput, InventoryReport, MovementReversal, RecordMovementInput,
};
use crate::services::{AlertService, StockService};
use crate::AppState;

/// `GET /stock` query
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockQuery {
    /// works | movements | alerts | stats | pending
    #[serde(rename = "type")]
    pub view: Option<String>,
    pub work_id: Option<Uuid>,
    pub movement_type: Option<String>,
    pub include_resolved: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMovementRequest {
    pub work_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub movement_type: Option<String>,
    pub quantity: Option<i32>,
    pub reason: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMovementQuery {
    pub id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct DeleteMovementResponse {
    pub success: bool,
    #[serde(flatten)]
    pub reversal: MovementReversal,
}

/// Read projections over stock
pub async fn get_stock(
    State(state): State<AppState>,
    Query(query): Query<StockQuery>,
) -> AppResult<Response> {
    let service = StockService::new(state.store.clone(), &state.config.stock);

    let response = match query.view.as_deref().unwrap_or("works") {
        "works" => Json(service.works().await?).into_response(),
        "movements" => {
            let filter = MovementFilter {
                work_id: query.work_id,
                movement_type: query
                    .movement_type
                    .as_deref()
                    .map(str::parse::<MovementType>)
                    .transpose()?,
                since: None,
            };
            Json(service.recent_movements(&filter).await?).into_response()
        }
        "alerts" => {
            let alerts = AlertService::new(state.store.clone())
                .current_alerts(query.include_resolved.unwrap_or(false))
                .await?;
            Json(alerts).into_response()
        }
        "stats" => Json(service.stats().await?).into_response(),
        "pending" => Json(service.pending().await?).into_response(),
        other => {
            return Err(AppError::Validation {
                field: "type".to_string(),
                message: format!("Unknown stock view: {}", other),
                message_fr: format!("Vue de stock inconnue : {}", other),
            })
        }
    };

    Ok(response)
}

/// Record a stock movement
pub async fn record_movement(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<RecordMovementRequest>,
) -> AppResult<Json<StockMovement>> {
    let input = RecordMovementInput {
        work_id: request
            .work_id
            .ok_or_else(|| AppError::missing_field("workId"))?,
        movement_type: request
            .movement_type
            .as_deref()
            .ok_or_else(|| AppError::missing_field("type"))?
            .parse()?,
        quantity: request
            .quantity
            .ok_or_else(|| AppError::missing_field("quantity"))?,
        reason: request.reason,
        reference: request.reference,
    };

    let service = StockService::new(state.store.clone(), &state.config.stock);
    let movement = service
        .record_movement(input, current_user.0.user_id)
        .await?;
    Ok(Json(movement))
}

/// Reverse and delete a stock movement
pub async fn delete_movement(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<DeleteMovementQuery>,
) -> AppResult<Json<DeleteMovementResponse>> {
    let id = query.id.ok_or_else(|| AppError::missing_field("id"))?;

    let service = StockService::new(state.store.clone(), &state.config.stock);
    let reversal = service.delete_movement(id, current_user.0.user_id).await?;
    Ok(Json(DeleteMovementResponse {
        success: true,
        reversal,
    }))
}

/// Apply a physical inventory count
pub async fn apply_inventory(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<InventoryCountInput>,
) -> AppResult<Json<InventoryReport>> {
    let service = StockService::new(state.store.clone(), &state.config.stock);
    let report = service
        .apply_inventory(input, current_user.0.user_id)
        .await?;
    Ok(Json(report))
}
