//! Route definitions for the book inventory ledger

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{
    handlers,
    middleware::{auth_middleware, require_pdg},
    AppState,
};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Payment provider webhook (public, authenticated by signature)
        .route("/webhook", post(handlers::handle_webhook))
        // Protected routes - warehouse stock
        .nest("/stock", stock_routes(state.clone()))
        // Protected routes - delivery notes
        .nest("/delivery-notes", delivery_note_routes(state.clone()))
        // Protected routes - partner consignment
        .nest("/partner-stock", partner_stock_routes(state))
}

/// Warehouse stock routes (PDG)
fn stock_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::get_stock)
                .post(handlers::record_movement)
                .delete(handlers::delete_movement),
        )
        .route("/inventory", post(handlers::apply_inventory))
        .route_layer(middleware::from_fn(require_pdg))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Delivery note routes (PDG)
fn delivery_note_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_delivery_notes)
                .post(handlers::create_delivery_note)
                .put(handlers::update_delivery_note),
        )
        .route("/create-missing", post(handlers::create_missing_delivery_notes))
        .route("/:id", get(handlers::get_delivery_note))
        .route_layer(middleware::from_fn(require_pdg))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Partner consignment routes (PDG)
fn partner_stock_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_partner_stock))
        .route("/allocate", post(handlers::allocate_partner_stock))
        .route("/sales", post(handlers::record_partner_sale))
        .route("/returns", post(handlers::record_partner_return))
        .route_layer(middleware::from_fn(require_pdg))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
