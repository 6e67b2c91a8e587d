//! HTTP handlers for delivery note endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use shared::models::{DeliveryNote, DeliveryNoteFilter, DeliveryNoteStatus};
use shared::{PaginatedResponse, Pagination};
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::delivery_note::{
    BackfillReport, CreateDeliveryNoteInput, DeliveryNoteDetail, TransitionInput,
};
use crate::services::DeliveryNoteService;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DeliveryNoteQuery {
    pub status: Option<String>,
    pub period: Option<String>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// List delivery notes
pub async fn list_delivery_notes(
    State(state): State<AppState>,
    Query(query): Query<DeliveryNoteQuery>,
) -> AppResult<Json<PaginatedResponse<DeliveryNote>>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty() && *s != "all")
        .map(str::parse::<DeliveryNoteStatus>)
        .transpose()?;
    let filter = DeliveryNoteFilter {
        status,
        period: query.period.filter(|p| !p.is_empty()),
        search: query.search,
    };

    let service = DeliveryNoteService::new(state.store.clone());
    let notes = service
        .list(filter, Pagination::from_query(query.page, query.limit))
        .await?;
    Ok(Json(notes))
}

/// Create the delivery note of an order
pub async fn create_delivery_note(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateDeliveryNoteInput>,
) -> AppResult<Json<DeliveryNote>> {
    let service = DeliveryNoteService::new(state.store.clone());
    let note = service.create(input, current_user.0.user_id).await?;
    Ok(Json(note))
}

/// Create notes for confirmed orders that have none
pub async fn create_missing_delivery_notes(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<BackfillReport>> {
    let service = DeliveryNoteService::new(state.store.clone());
    Ok(Json(service.create_missing(current_user.0.user_id).await?))
}

/// Apply a workflow action
pub async fn update_delivery_note(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<TransitionInput>,
) -> AppResult<Json<DeliveryNote>> {
    let service = DeliveryNoteService::new(state.store.clone());
    let note = service.transition(input, current_user.0.user_id).await?;
    Ok(Json(note))
}

/// Get a delivery note with its order lines
pub async fn get_delivery_note(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DeliveryNoteDetail>> {
    let service = DeliveryNoteService::new(state.store.clone());
    Ok(Json(service.detail(id).await?))
}
