//! Push handler - authoritative end-of-day order submission.

use super::orders::{write_order, OrderLine};
use crate::db::{self, OrderFields};
use crate::error::Result;
use chrono::Utc;
use possync_engine::{
    protocol::{PushRequest, PushResponse},
    IdentifierMapping,
};
use sqlx::PgPool;
use std::collections::BTreeSet;

/// Process a push request from a client.
///
/// Every order is created at most once per handle. The response maps each
/// accepted handle to its server id and reports the post-push stock of every
/// product the request touched.
pub async fn handle_push(pool: &PgPool, request: PushRequest) -> Result<PushResponse> {
    let mut id_map = Vec::new();
    let mut rejected = Vec::new();
    let mut touched = BTreeSet::new();
    let received_at = Utc::now();

    for order in &request.orders {
        touched.extend(order.items.iter().map(|item| item.product_id));
        let lines: Vec<OrderLine<'_>> = order.items.iter().map(OrderLine::from).collect();
        let fields = OrderFields {
            local_ref: order.id.as_str(),
            node_id: &request.node_id,
            total: order.total,
            status: order.status,
            updated_at: received_at,
        };

        match write_order(pool, fields, &order.id, &lines).await? {
            Ok(id) => id_map.push(IdentifierMapping::new(order.id.clone(), id)),
            Err(record) => rejected.push(record),
        }
    }

    let server_stock = db::stock_levels(pool, &touched.into_iter().collect::<Vec<_>>()).await?;

    tracing::info!(
        node = %request.node_id,
        orders = request.orders.len(),
        accepted = id_map.len(),
        rejected = rejected.len(),
        "push processed"
    );

    Ok(PushResponse {
        id_map,
        server_stock,
        rejected,
    })
}
