//! Database operations for the inventory_transactions table.

use possync_engine::{protocol::InventoryTransactionPayload, ServerId};
use sqlx::PgConnection;

/// Check whether a client's adjustment has already been recorded.
pub async fn transaction_exists(
    conn: &mut PgConnection,
    local_ref: &str,
) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM inventory_transactions WHERE local_ref = $1")
            .bind(local_ref)
            .fetch_optional(conn)
            .await?;

    Ok(row.is_some())
}

/// Record an adjustment in the ledger.
pub async fn insert_transaction(
    conn: &mut PgConnection,
    transaction: &InventoryTransactionPayload,
) -> Result<ServerId, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO inventory_transactions (local_ref, product_id, change, reason)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(transaction.local_id.as_ref().map(|h| h.as_str()))
    .bind(transaction.product_id)
    .bind(transaction.change)
    .bind(&transaction.reason)
    .fetch_one(conn)
    .await?;

    Ok(row.0)
}
