//! Database operations for the products table.
//!
//! Stock only ever moves through [`apply_stock_delta`], a single guarded
//! `UPDATE` that refuses to take a counter below zero. Concurrent pushes from
//! several tills serialize on the row lock.

use possync_engine::{Product, Quantity, ServerId, StockDelta, StockLevel, Timestamp};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row};

/// A stored product row from the database.
#[derive(Debug)]
pub struct StoredProduct {
    pub id: i64,
    pub name: String,
    pub price: Decimal,
    pub stock: Quantity,
    pub category_id: Option<i64>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredProduct {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredProduct {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            price: row.try_get("price")?,
            stock: decode_stock(row.try_get("stock")?)?,
            category_id: row.try_get("category_id")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredProduct {
    /// Convert database row to the engine's product.
    pub fn into_product(self) -> Product {
        Product {
            id: self.id,
            name: self.name,
            price: self.price,
            stock: self.stock,
            category_id: self.category_id,
            updated_at: Timestamp::from_datetime(self.updated_at),
        }
    }
}

fn decode_stock(stock: i64) -> Result<Quantity, sqlx::Error> {
    Quantity::try_from(stock).map_err(|e| sqlx::Error::ColumnDecode {
        index: "stock".to_string(),
        source: Box::new(e),
    })
}

/// Result of a guarded stock update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockChange {
    /// The delta landed; carries the new level
    Applied(Quantity),
    /// Would leave the counter outside `0..=u32::MAX`; carries the current level
    Refused(Quantity),
    UnknownProduct,
}

/// List the full catalog.
pub async fn list_products(pool: &PgPool) -> Result<Vec<Product>, sqlx::Error> {
    let rows: Vec<StoredProduct> = sqlx::query_as(
        r#"
        SELECT id, name, price, stock, category_id, updated_at
        FROM products
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(StoredProduct::into_product).collect())
}

/// Apply a signed delta to one product's stock.
pub async fn apply_stock_delta(
    conn: &mut PgConnection,
    product_id: ServerId,
    delta: StockDelta,
) -> Result<StockChange, sqlx::Error> {
    let updated: Option<(i64,)> = sqlx::query_as(
        r#"
        UPDATE products
        SET stock = stock + $1
        WHERE id = $2 AND stock + $1 BETWEEN 0 AND 4294967295
        RETURNING stock
        "#,
    )
    .bind(delta)
    .bind(product_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((stock,)) = updated {
        return Ok(StockChange::Applied(decode_stock(stock)?));
    }

    let current: Option<(i64,)> = sqlx::query_as("SELECT stock FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?;

    match current {
        Some((stock,)) => Ok(StockChange::Refused(decode_stock(stock)?)),
        None => Ok(StockChange::UnknownProduct),
    }
}

/// Current stock for the given products, ordered by id.
pub async fn stock_levels(pool: &PgPool, ids: &[ServerId]) -> Result<Vec<StockLevel>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT id, stock
        FROM products
        WHERE id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(id, stock)| {
            Ok(StockLevel {
                id,
                stock: decode_stock(stock)?,
            })
        })
        .collect()
}
