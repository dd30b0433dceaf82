//! Order handlers - idempotent, per-order atomic order creation.
//!
//! Each order is written in its own transaction: the header, every line and
//! every stock decrement land together or not at all. One refused order never
//! rolls back another order of the same request.

use super::{instant, refusal_reason, rejected};
use crate::db::{self, OrderFields, StockChange};
use crate::error::{AppError, Result};
use possync_engine::{
    protocol::{PushItem, RejectedRecord, RejectionKind, SyncOrdersRequest, SyncOrdersResponse},
    IdentifierMapping, LocalHandle, ServerId, StockDelta, Violation,
};
use sqlx::PgPool;
use std::collections::{BTreeMap, BTreeSet};

/// One order line, optionally keyed by the client's handle for the line.
#[derive(Debug, Clone)]
pub struct OrderLine<'a> {
    pub local_ref: Option<&'a LocalHandle>,
    pub item: PushItem,
}

impl<'a> From<&'a PushItem> for OrderLine<'a> {
    fn from(item: &'a PushItem) -> Self {
        Self {
            local_ref: None,
            item: item.clone(),
        }
    }
}

/// Net stock change per product for a set of lines, ordered by product id.
///
/// The fixed order keeps concurrent transactions from locking the same
/// product rows in opposite orders.
pub fn line_deltas(
    order: &LocalHandle,
    lines: &[OrderLine<'_>],
) -> std::result::Result<BTreeMap<ServerId, StockDelta>, RejectedRecord> {
    let mut deltas: BTreeMap<ServerId, StockDelta> = BTreeMap::new();
    for line in lines {
        if line.item.quantity == 0 {
            let violation = Violation::ZeroQuantity {
                product_id: line.item.product_id,
            };
            return Err(rejected(order, violation.to_string(), RejectionKind::Invalid));
        }
        let delta = deltas.entry(line.item.product_id).or_default();
        *delta -= StockDelta::from(line.item.quantity);
    }
    Ok(deltas)
}

/// Create one order with its lines, or return the id it already has.
pub async fn write_order(
    pool: &PgPool,
    fields: OrderFields<'_>,
    handle: &LocalHandle,
    lines: &[OrderLine<'_>],
) -> Result<std::result::Result<ServerId, RejectedRecord>> {
    let deltas = match line_deltas(handle, lines) {
        Ok(deltas) => deltas,
        Err(record) => return Ok(Err(record)),
    };

    let mut tx = pool.begin().await?;

    let Some(order_id) = db::insert_order(&mut *tx, fields).await? else {
        // Known handle: the earlier write already moved stock
        let existing = db::find_order_by_ref(&mut *tx, handle.as_str()).await?;
        tx.rollback().await?;
        tracing::debug!(order = %handle, "order already recorded");
        return existing.map(Ok).ok_or_else(|| {
            AppError::Internal(format!("order {handle} conflicted but was not found"))
        });
    };

    for (&product_id, &delta) in &deltas {
        let refusal = match db::apply_stock_delta(&mut *tx, product_id, delta).await? {
            StockChange::Applied(_) => continue,
            StockChange::Refused(stock) => rejected(
                handle,
                refusal_reason(product_id, stock, delta),
                RejectionKind::Invariant,
            ),
            // retrying cannot help, so the client flags the order
            StockChange::UnknownProduct => rejected(
                handle,
                Violation::UnknownProduct(product_id).to_string(),
                RejectionKind::Invariant,
            ),
        };
        tx.rollback().await?;
        tracing::warn!(order = %handle, reason = %refusal.reason, "order refused");
        return Ok(Err(refusal));
    }

    for line in lines {
        db::insert_order_item(
            &mut *tx,
            order_id,
            line.local_ref.map(LocalHandle::as_str),
            &line.item,
        )
        .await?;
    }

    tx.commit().await?;
    tracing::debug!(order = %handle, id = order_id, lines = lines.len(), "order created");
    Ok(Ok(order_id))
}

/// Process a flat orders-plus-items request.
///
/// Lines are attached to their order through `localOrderId`. Orders are
/// identified by their handle alone: a server id the client claims is never
/// trusted, and a handle the server already knows maps to the id it holds.
pub async fn handle_sync_orders(
    pool: &PgPool,
    request: SyncOrdersRequest,
) -> Result<SyncOrdersResponse> {
    let mut id_map = Vec::new();
    let mut rejected_records = Vec::new();
    let mut touched = BTreeSet::new();

    let batch: BTreeSet<&LocalHandle> = request.orders.iter().map(|o| &o.local_id).collect();

    for order in &request.orders {
        if let Some(claimed) = order.id {
            tracing::debug!(order = %order.local_id, claimed, "client-held order id ignored");
        }

        let lines: Vec<OrderLine<'_>> = request
            .order_items
            .iter()
            .filter(|item| item.local_order_id.as_ref() == Some(&order.local_id))
            .map(|item| OrderLine {
                local_ref: item.local_id.as_ref(),
                item: PushItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                },
            })
            .collect();
        touched.extend(lines.iter().map(|line| line.item.product_id));

        let fields = OrderFields {
            local_ref: order.local_id.as_str(),
            node_id: &request.node_id,
            total: order.total,
            status: order.status,
            updated_at: instant(order.updated_at)?,
        };
        match write_order(pool, fields, &order.local_id, &lines).await? {
            Ok(id) => id_map.push(IdentifierMapping::new(order.local_id.clone(), id)),
            Err(record) => rejected_records.push(record),
        }
    }

    let mut orphaned = false;
    for item in &request.order_items {
        let parent = item.local_order_id.as_ref();
        if parent.is_some_and(|handle| batch.contains(handle)) {
            continue;
        }
        orphaned = true;
        match (&item.local_id, parent) {
            (Some(line), Some(order)) => rejected_records.push(rejected(
                line,
                Violation::UnmappedParent {
                    item: line.clone(),
                    order: order.clone(),
                }
                .to_string(),
                RejectionKind::Invalid,
            )),
            _ => tracing::warn!(
                product_id = item.product_id,
                order_id = ?item.order_id,
                "order line without a parent in this request ignored"
            ),
        }
    }

    let server_stock = db::stock_levels(pool, &touched.into_iter().collect::<Vec<_>>()).await?;

    tracing::info!(
        node = %request.node_id,
        created = id_map.len(),
        rejected = rejected_records.len(),
        "orders synced"
    );

    Ok(SyncOrdersResponse {
        success: rejected_records.is_empty() && !orphaned,
        id_map,
        rejected: rejected_records,
        server_stock,
    })
}
