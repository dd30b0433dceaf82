//! Database operations for the orders and order_items tables.

use chrono::{DateTime, Utc};
use possync_engine::{protocol::PushItem, OrderStatus, ServerId};
use rust_decimal::Decimal;
use sqlx::PgConnection;

/// Column values written for an order header.
#[derive(Debug, Clone, Copy)]
pub struct OrderFields<'a> {
    pub local_ref: &'a str,
    pub node_id: &'a str,
    pub total: Decimal,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

/// Server id previously issued for a client's order handle.
pub async fn find_order_by_ref(
    conn: &mut PgConnection,
    local_ref: &str,
) -> Result<Option<ServerId>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM orders WHERE local_ref = $1")
        .bind(local_ref)
        .fetch_optional(conn)
        .await?;

    Ok(row.map(|(id,)| id))
}

/// Insert an order header.
///
/// Returns `None` when the handle is already known; the caller then looks up
/// the existing id and leaves stock alone.
pub async fn insert_order(
    conn: &mut PgConnection,
    fields: OrderFields<'_>,
) -> Result<Option<ServerId>, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO orders (local_ref, node_id, total, status, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (local_ref) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(fields.local_ref)
    .bind(fields.node_id)
    .bind(fields.total)
    .bind(fields.status.as_str())
    .bind(fields.updated_at)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|(id,)| id))
}

/// Insert one order line. Returns false when a line with the same handle
/// already exists.
pub async fn insert_order_item(
    conn: &mut PgConnection,
    order_id: ServerId,
    local_ref: Option<&str>,
    item: &PushItem,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO order_items (order_id, local_ref, product_id, quantity, price)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (local_ref) DO NOTHING
        "#,
    )
    .bind(order_id)
    .bind(local_ref)
    .bind(item.product_id)
    .bind(i64::from(item.quantity))
    .bind(item.price)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}
