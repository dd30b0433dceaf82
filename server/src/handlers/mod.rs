//! Request handlers for sync operations.

mod catalog;
mod category;
mod inventory;
mod orders;
mod push;

pub use catalog::*;
pub use category::*;
pub use inventory::*;
pub use orders::*;
pub use push::*;

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use possync_engine::{
    protocol::{RejectedRecord, RejectionKind},
    stock::apply_delta,
    LocalHandle, Quantity, ServerId, StockDelta, Timestamp,
};

/// Convert a wire timestamp into a column value.
fn instant(at: Timestamp) -> Result<DateTime<Utc>> {
    at.to_datetime()
        .ok_or_else(|| AppError::BadRequest(format!("timestamp {at} is out of range")))
}

fn rejected(local_id: &LocalHandle, reason: impl Into<String>, kind: RejectionKind) -> RejectedRecord {
    RejectedRecord {
        local_id: local_id.clone(),
        reason: reason.into(),
        kind,
    }
}

/// Explain a refused stock change the same way a client would.
fn refusal_reason(product_id: ServerId, stock: Quantity, delta: StockDelta) -> String {
    match apply_delta(product_id, stock, delta) {
        Err(e) => e.to_string(),
        Ok(_) => format!("stock change {delta:+} for product {product_id} was refused"),
    }
}
