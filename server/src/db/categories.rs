//! Database operations for the categories table.

use chrono::{DateTime, Utc};
use possync_engine::{protocol::ServerCategory, ServerId, Timestamp};
use sqlx::{PgConnection, PgPool, Row};

/// A stored category row from the database.
#[derive(Debug)]
pub struct StoredCategory {
    pub id: i64,
    pub title: String,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredCategory {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredCategory {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            completed: row.try_get("completed")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredCategory {
    /// Convert database row to its wire form.
    pub fn into_server_category(self) -> ServerCategory {
        ServerCategory {
            id: self.id,
            title: self.title,
            completed: self.completed,
            updated_at: Timestamp::from_datetime(self.updated_at),
        }
    }
}

/// Column values written for a category.
#[derive(Debug, Clone, Copy)]
pub struct CategoryFields<'a> {
    pub title: &'a str,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

/// List every category.
pub async fn list_categories(pool: &PgPool) -> Result<Vec<ServerCategory>, sqlx::Error> {
    let rows: Vec<StoredCategory> = sqlx::query_as(
        r#"
        SELECT id, title, completed, updated_at
        FROM categories
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(StoredCategory::into_server_category)
        .collect())
}

/// Get a category by server id.
pub async fn get_category(
    conn: &mut PgConnection,
    id: ServerId,
) -> Result<Option<ServerCategory>, sqlx::Error> {
    let row: Option<StoredCategory> = sqlx::query_as(
        r#"
        SELECT id, title, completed, updated_at
        FROM categories
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(StoredCategory::into_server_category))
}

/// Server id previously issued for a client's local handle.
pub async fn find_category_by_ref(
    conn: &mut PgConnection,
    local_ref: &str,
) -> Result<Option<ServerId>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM categories WHERE local_ref = $1")
        .bind(local_ref)
        .fetch_optional(conn)
        .await?;

    Ok(row.map(|(id,)| id))
}

/// Create a category under a fresh server id.
///
/// Idempotent per `local_ref`: a second insert for the same handle returns
/// the id issued the first time.
pub async fn insert_category(
    conn: &mut PgConnection,
    local_ref: Option<&str>,
    fields: CategoryFields<'_>,
) -> Result<ServerId, sqlx::Error> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO categories (local_ref, title, completed, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (local_ref) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(local_ref)
    .bind(fields.title)
    .bind(fields.completed)
    .bind(fields.updated_at)
    .fetch_optional(&mut *conn)
    .await?;

    match (inserted, local_ref) {
        (Some((id,)), _) => Ok(id),
        (None, Some(local_ref)) => find_category_by_ref(conn, local_ref)
            .await?
            .ok_or(sqlx::Error::RowNotFound),
        (None, None) => Err(sqlx::Error::RowNotFound),
    }
}

/// Create a category under an id the client already holds.
pub async fn insert_category_with_id(
    conn: &mut PgConnection,
    id: ServerId,
    fields: CategoryFields<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO categories (id, title, completed, updated_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(fields.title)
    .bind(fields.completed)
    .bind(fields.updated_at)
    .execute(&mut *conn)
    .await?;

    // keep the sequence ahead of explicitly chosen ids
    sqlx::query(
        r#"
        SELECT setval(
            pg_get_serial_sequence('categories', 'id'),
            (SELECT MAX(id) FROM categories)
        )
        "#,
    )
    .execute(conn)
    .await?;

    Ok(())
}

/// Overwrite a category with a newer version.
///
/// The timestamp comparison happens in the statement itself, so of two
/// racing edits the older one can never land last. Returns false when the
/// stored row is as new or newer.
pub async fn update_category(
    conn: &mut PgConnection,
    id: ServerId,
    fields: CategoryFields<'_>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE categories
        SET title = $2, completed = $3, updated_at = $4
        WHERE id = $1 AND updated_at < $4
        "#,
    )
    .bind(id)
    .bind(fields.title)
    .bind(fields.completed)
    .bind(fields.updated_at)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
