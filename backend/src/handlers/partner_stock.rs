//! HTTP handlers for partner consignment stock

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use shared::models::AllocationView;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::allocation::ConsignmentInput;
use crate::services::AllocationService;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerStockQuery {
    pub partner_id: Option<Uuid>,
}

/// List allocations with their available quantity
pub async fn list_partner_stock(
    State(state): State<AppState>,
    Query(query): Query<PartnerStockQuery>,
) -> AppResult<Json<Vec<AllocationView>>> {
    let service = AllocationService::new(state.store.clone());
    Ok(Json(service.list(query.partner_id).await?))
}

/// Transfer books from the warehouse to a partner
pub async fn allocate_partner_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ConsignmentInput>,
) -> AppResult<Json<AllocationView>> {
    let service = AllocationService::new(state.store.clone());
    Ok(Json(service.allocate(input, current_user.0.user_id).await?))
}

/// Record a partner sale
pub async fn record_partner_sale(
    State(state): State<AppState>,
    Json(input): Json<ConsignmentInput>,
) -> AppResult<Json<AllocationView>> {
    let service = AllocationService::new(state.store.clone());
    Ok(Json(service.record_sale(input).await?))
}

/// Record a partner return
pub async fn record_partner_return(
    State(state): State<AppState>,
    Json(input): Json<ConsignmentInput>,
) -> AppResult<Json<AllocationView>> {
    let service = AllocationService::new(state.store.clone());
    Ok(Json(service.record_return(input).await?))
}
