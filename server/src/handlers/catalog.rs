//! Catalog handler - the start-of-day snapshot.

use crate::db;
use crate::error::Result;
use possync_engine::protocol::CatalogResponse;
use sqlx::PgPool;

/// Products with current stock, plus every category.
pub async fn handle_catalog(pool: &PgPool) -> Result<CatalogResponse> {
    let products = db::list_products(pool).await?;
    let categories = db::list_categories(pool).await?;

    tracing::debug!(
        products = products.len(),
        categories = categories.len(),
        "catalog served"
    );

    Ok(CatalogResponse {
        products,
        categories,
    })
}
