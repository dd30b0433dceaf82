//! Sync endpoint routes.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use possync_engine::protocol::{
    CatalogResponse, PushRequest, PushResponse, SyncCategoriesRequest, SyncCategoriesResponse,
    SyncInventoryRequest, SyncInventoryResponse, SyncOrdersRequest, SyncOrdersResponse,
};

use crate::error::Result;
use crate::handlers::{
    handle_catalog, handle_push, handle_sync_categories, handle_sync_inventory,
    handle_sync_orders,
};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/sync/category", post(categories_handler))
        .route("/api/sync/inventory", post(inventory_handler))
        .route("/api/sync/orders", post(orders_handler))
        .route("/api/sync/push", post(push_handler))
        .route("/api/sync/catalog", get(catalog_handler))
}

/// POST /api/sync/category - Merge categories.
async fn categories_handler(
    State(state): State<AppState>,
    Json(request): Json<SyncCategoriesRequest>,
) -> Result<Json<SyncCategoriesResponse>> {
    let response = handle_sync_categories(&state.pool, request).await?;
    Ok(Json(response))
}

/// POST /api/sync/inventory - Record stock adjustments.
async fn inventory_handler(
    State(state): State<AppState>,
    Json(request): Json<SyncInventoryRequest>,
) -> Result<Json<SyncInventoryResponse>> {
    let response = handle_sync_inventory(&state.pool, request).await?;
    Ok(Json(response))
}

/// POST /api/sync/orders - Flat orders-plus-items remap flow.
async fn orders_handler(
    State(state): State<AppState>,
    Json(request): Json<SyncOrdersRequest>,
) -> Result<Json<SyncOrdersResponse>> {
    let response = handle_sync_orders(&state.pool, request).await?;
    Ok(Json(response))
}

/// POST /api/sync/push - Authoritative end-of-day push.
async fn push_handler(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let response = handle_push(&state.pool, request).await?;
    Ok(Json(response))
}

/// GET /api/sync/catalog - Start-of-day snapshot.
async fn catalog_handler(State(state): State<AppState>) -> Result<Json<CatalogResponse>> {
    let response = handle_catalog(&state.pool).await?;
    Ok(Json(response))
}
