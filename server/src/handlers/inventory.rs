//! Inventory handler - stock adjustments recorded once each.

use super::{refusal_reason, rejected};
use crate::db::{self, StockChange};
use crate::error::Result;
use possync_engine::{
    protocol::{RejectedRecord, RejectionKind, SyncInventoryRequest, SyncInventoryResponse},
    Violation,
};
use sqlx::PgPool;
use std::collections::BTreeSet;

/// Apply each adjustment in its own transaction.
///
/// Adjustments carrying a `localId` are applied at most once; a repeat is
/// reported as accepted without touching stock again.
pub async fn handle_sync_inventory(
    pool: &PgPool,
    request: SyncInventoryRequest,
) -> Result<SyncInventoryResponse> {
    let mut accepted = Vec::new();
    let mut rejected_records: Vec<RejectedRecord> = Vec::new();
    let mut unreported_failures = 0usize;
    let mut touched = BTreeSet::new();

    for transaction in &request.transactions {
        touched.insert(transaction.product_id);
        let handle = transaction.local_id.as_ref();

        let refusal = if transaction.change == 0 {
            Some((
                Violation::ZeroChange {
                    product_id: transaction.product_id,
                }
                .to_string(),
                RejectionKind::Invalid,
            ))
        } else {
            let mut tx = pool.begin().await?;
            if let Some(handle) = handle {
                if db::transaction_exists(&mut *tx, handle.as_str()).await? {
                    tx.rollback().await?;
                    accepted.push(handle.clone());
                    continue;
                }
            }

            match db::apply_stock_delta(&mut *tx, transaction.product_id, transaction.change)
                .await?
            {
                StockChange::Applied(stock) => {
                    match db::insert_transaction(&mut *tx, transaction).await {
                        Ok(_) => tx.commit().await?,
                        // a concurrent request recorded the same handle first
                        Err(e) if db::is_unique_violation(&e) => tx.rollback().await?,
                        Err(e) => return Err(e.into()),
                    }
                    tracing::debug!(
                        product_id = transaction.product_id,
                        change = transaction.change,
                        stock,
                        "adjustment applied"
                    );
                    None
                }
                StockChange::Refused(stock) => {
                    tx.rollback().await?;
                    Some((
                        refusal_reason(transaction.product_id, stock, transaction.change),
                        RejectionKind::Invariant,
                    ))
                }
                StockChange::UnknownProduct => {
                    tx.rollback().await?;
                    Some((
                        Violation::UnknownProduct(transaction.product_id).to_string(),
                        RejectionKind::Invalid,
                    ))
                }
            }
        };

        match (refusal, handle) {
            (None, Some(handle)) => accepted.push(handle.clone()),
            (None, None) => {}
            (Some((reason, kind)), Some(handle)) => {
                tracing::warn!(transaction = %handle, %reason, "adjustment refused");
                rejected_records.push(rejected(handle, reason, kind));
            }
            (Some((reason, _)), None) => {
                tracing::warn!(
                    product_id = transaction.product_id,
                    %reason,
                    "adjustment without localId refused"
                );
                unreported_failures += 1;
            }
        }
    }

    let server_stock = db::stock_levels(pool, &touched.into_iter().collect::<Vec<_>>()).await?;

    tracing::info!(
        accepted = accepted.len(),
        rejected = rejected_records.len() + unreported_failures,
        "inventory synced"
    );

    Ok(SyncInventoryResponse {
        success: rejected_records.is_empty() && unreported_failures == 0,
        accepted,
        rejected: rejected_records,
        server_stock,
    })
}
