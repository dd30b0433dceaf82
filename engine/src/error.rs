//! Error types for the possync engine.

use crate::{LocalHandle, ServerId, StockDelta, Table};
use thiserror::Error;

/// All possible errors from the possync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Transport errors: nothing was applied locally, the call is safe to retry
    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },

    #[error("server rejected the request: {0}")]
    Rejected(String),

    // Refusals raised before any mutation
    #[error("precondition failed: {0}")]
    Precondition(PreconditionFailure),

    // Fatal to a single record, never to the batch
    #[error("invariant violation: {0}")]
    InvariantViolation(Violation),

    // Store errors
    #[error("record not found in {table}: {key}")]
    NotFound { table: Table, key: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    /// Whether the caller may retry the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { retryable, .. } => *retryable,
            Error::Rejected(_) => true,
            _ => false,
        }
    }

    pub(crate) fn not_found(table: Table, key: impl ToString) -> Self {
        Error::NotFound {
            table,
            key: key.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Why an operation was refused before touching the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionFailure {
    #[error("{count} unsynced order(s) exist, run end-of-day sync first")]
    UnsyncedOrders { count: usize },

    #[error("record {0} is not flagged for review")]
    NotFlagged(LocalHandle),
}

/// A record-level policy violation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("stock for product {product_id} would go negative ({stock} {delta:+})")]
    NegativeStock {
        product_id: ServerId,
        stock: u32,
        delta: StockDelta,
    },

    #[error("stock for product {product_id} would overflow")]
    StockOverflow { product_id: ServerId },

    #[error("order item {item} references unmapped order {order}")]
    UnmappedParent { item: LocalHandle, order: LocalHandle },

    #[error("order item for product {product_id} has zero quantity")]
    ZeroQuantity { product_id: ServerId },

    #[error("inventory adjustment for product {product_id} has zero change")]
    ZeroChange { product_id: ServerId },

    #[error("unknown product {0}")]
    UnknownProduct(ServerId),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
