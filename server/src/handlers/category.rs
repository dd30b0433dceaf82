//! Category handler - last-writer-wins merge of client categories.

use super::instant;
use crate::db::{self, CategoryFields};
use crate::error::Result;
use possync_engine::{
    protocol::{SyncCategoriesRequest, SyncCategoriesResponse},
    resolve::{server_merge, ServerMerge},
    Category, IdentifierMapping,
};
use sqlx::PgPool;

/// Merge the client's categories and answer with the full list.
///
/// New categories are created once per local handle; a repeated request gets
/// the original id back. Known ids are overwritten only by a strictly newer
/// `updatedAt`.
pub async fn handle_sync_categories(
    pool: &PgPool,
    request: SyncCategoriesRequest,
) -> Result<SyncCategoriesResponse> {
    let mut conn = pool.acquire().await?;
    let mut id_map = Vec::new();
    let received = request.categories.len();

    for incoming in request.categories {
        if let Some(local_id) = &incoming.local_id {
            if let Some(id) = db::find_category_by_ref(&mut *conn, local_id.as_str()).await? {
                id_map.push(IdentifierMapping::new(local_id.clone(), id));
                continue;
            }
        }

        let client_ref = incoming.local_id.clone();
        let category = incoming.into_category();
        let fields = CategoryFields {
            title: &category.title,
            completed: category.completed,
            updated_at: instant(category.updated_at)?,
        };

        let existing = match category.id.server_id() {
            Some(id) => db::get_category(&mut *conn, id).await?.map(Category::from),
            None => None,
        };

        match server_merge(&category, existing.as_ref()) {
            ServerMerge::Create => {
                let local_ref = client_ref.as_ref().map(|handle| handle.as_str());
                let id = db::insert_category(&mut *conn, local_ref, fields).await?;
                if let Some(handle) = client_ref {
                    id_map.push(IdentifierMapping::new(handle, id));
                }
                tracing::debug!(id, title = %category.title, "category created");
            }
            ServerMerge::CreateWithId(id) => {
                db::insert_category_with_id(&mut *conn, id, fields).await?;
                tracing::debug!(id, "category created under client id");
            }
            ServerMerge::Update(id) => {
                if db::update_category(&mut *conn, id, fields).await? {
                    tracing::debug!(id, "category overwritten by newer client edit");
                } else {
                    tracing::debug!(id, "a newer edit landed first, kept");
                }
            }
            ServerMerge::Keep(id) => {
                tracing::debug!(id, "server category is newer or tied, kept");
            }
        }
    }
    drop(conn);

    let server_categories = db::list_categories(pool).await?;

    tracing::info!(
        received,
        created = id_map.len(),
        total = server_categories.len(),
        "categories synced"
    );

    Ok(SyncCategoriesResponse {
        server_categories,
        id_map,
    })
}
