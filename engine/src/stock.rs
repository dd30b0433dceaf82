//! Stock reconciliation.
//!
//! Stock only ever moves by signed deltas. The single exception is the
//! pull-back after a push, where the server's post-delta value replaces the
//! local one, rebased on top of the sales the server has not seen yet.

use crate::{
    error::Result, store::MemoryTable, Error, Product, Quantity, RecordStore, ServerId,
    StockDelta, Violation,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Authoritative stock of one product as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub id: ServerId,
    pub stock: Quantity,
}

/// Apply a signed delta to a stock counter.
///
/// Fails instead of clamping when the result would be negative.
pub fn apply_delta(product_id: ServerId, stock: Quantity, delta: StockDelta) -> Result<Quantity> {
    let next = i64::from(stock)
        .checked_add(delta)
        .ok_or(Error::InvariantViolation(Violation::StockOverflow { product_id }))?;
    if next < 0 {
        return Err(Error::InvariantViolation(Violation::NegativeStock {
            product_id,
            stock,
            delta,
        }));
    }
    Quantity::try_from(next)
        .map_err(|_| Error::InvariantViolation(Violation::StockOverflow { product_id }))
}

/// Net (negative) stock delta per product for a set of sold lines.
pub fn sale_deltas(
    lines: impl IntoIterator<Item = (ServerId, Quantity)>,
) -> BTreeMap<ServerId, StockDelta> {
    let mut deltas = BTreeMap::new();
    for (product_id, quantity) in lines {
        *deltas.entry(product_id).or_insert(0) -= StockDelta::from(quantity);
    }
    deltas
}

/// Apply deltas to local products, all or nothing.
///
/// The local catalog is the server's, so a product missing from it would be
/// refused by the server too.
pub fn apply_local_deltas(
    products: &mut MemoryTable<Product>,
    deltas: &BTreeMap<ServerId, StockDelta>,
) -> Result<()> {
    let mut next = Vec::with_capacity(deltas.len());
    for (&product_id, &delta) in deltas {
        let product = products
            .get(&product_id)
            .ok_or(Error::InvariantViolation(Violation::UnknownProduct(product_id)))?;
        next.push((product_id, apply_delta(product_id, product.stock, delta)?));
    }
    for (product_id, stock) in next {
        if let Some(product) = products.get_mut(&product_id) {
            product.stock = stock;
        }
    }
    Ok(())
}

/// What a pull-back did to local stock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebaseReport {
    /// Products whose local stock was replaced
    pub updated: Vec<ServerId>,
    /// Products in the snapshot that are not in the local catalog
    pub unknown: Vec<ServerId>,
    /// Products where pending local sales exceed server stock; these were
    /// set to the bare server value
    pub overdrawn: Vec<ServerId>,
}

/// Overwrite local stock from a server snapshot.
///
/// `pending` holds the deltas of local sales the server has not folded in
/// yet; they are re-applied on top of the authoritative value so that an
/// order rung up during the push is not forgotten.
pub fn rebase_on_server(
    products: &mut MemoryTable<Product>,
    snapshot: &[StockLevel],
    pending: &BTreeMap<ServerId, StockDelta>,
) -> RebaseReport {
    let mut report = RebaseReport::default();
    for level in snapshot {
        let Some(product) = products.get_mut(&level.id) else {
            report.unknown.push(level.id);
            continue;
        };
        let delta = pending.get(&level.id).copied().unwrap_or(0);
        product.stock = match apply_delta(level.id, level.stock, delta) {
            Ok(stock) => stock,
            Err(_) => {
                tracing::warn!(
                    product_id = level.id,
                    server_stock = level.stock,
                    delta,
                    "pending local sales exceed server stock"
                );
                report.overdrawn.push(level.id);
                level.stock
            }
        };
        report.updated.push(level.id);
    }
    report
}
