//! # Possync Engine
//!
//! Reconciliation engine for an offline-capable point-of-sale client and its
//! authoritative server.
//!
//! The client rings up sales against a local replica while disconnected. A
//! day cycle bounds how far the two replicas may drift apart: start of day
//! pulls the server catalog and resets the local working set, end of day
//! pushes the accumulated orders and absorbs the server's answer.
//!
//! ## Core Concepts
//!
//! ### Identifiers
//!
//! Records created offline have no server id yet. They are referenced as
//! [`EntityRef::Local`] until the server accepts them and the
//! [`idmap`] module rewrites every reference to [`EntityRef::Remote`].
//! Dependent records are never pushed while their parent is still local.
//!
//! ### Conflicts
//!
//! Two versions of the same category are resolved by whole-record
//! last-writer-wins on `updatedAt` ([`resolve`]). Ties go to the server.
//!
//! ### Stock
//!
//! Stock only moves by signed deltas and never goes negative ([`stock`]).
//! Local stock is only overwritten from server snapshots: the start-of-day
//! catalog, and the stock levels a push returns, rebased on sales the server
//! has not seen yet.
//!
//! ### Day cycle
//!
//! [`DayCycleController`] runs one sync pass at a time over an explicit
//! [`LocalStore`] handle. Network calls go through a [`SyncTransport`].
//!
//! ## Quick Start
//!
//! ```rust
//! use possync_engine::{
//!     LocalStore, NewOrder, NewOrderItem, Product, RecordStore, Timestamp,
//! };
//! use rust_decimal::Decimal;
//!
//! // 1. Open a replica and load the catalog
//! let mut store = LocalStore::new("till-1");
//! store.products_mut().put(Product {
//!     id: 1,
//!     name: "Cola".into(),
//!     price: Decimal::from(50),
//!     stock: 10,
//!     category_id: None,
//!     updated_at: Timestamp::from_millis(0),
//! });
//!
//! // 2. Ring up a sale offline
//! let handle = store
//!     .create_order(
//!         NewOrder {
//!             total: Decimal::from(100),
//!             status: Default::default(),
//!             items: vec![NewOrderItem {
//!                 product_id: 1,
//!                 quantity: 2,
//!                 price: Decimal::from(50),
//!             }],
//!         },
//!         Timestamp::now(),
//!     )
//!     .unwrap();
//!
//! // 3. Stock drops immediately, the order waits for end of day
//! assert_eq!(store.products().get(&1).unwrap().stock, 8);
//! assert!(!store.orders().get(&handle).unwrap().synced);
//! ```
//!
//! ## Persistence
//!
//! Use [`LocalStore::open`] and [`LocalStore::close`] to back a replica with
//! a JSON [`StoreSnapshot`]. Snapshots serialize with deterministic ordering.
//!
//! ## Features
//!
//! - `http`: [`HttpTransport`](transport::HttpTransport), a reqwest-based
//!   [`SyncTransport`] for the possync server.

pub mod daycycle;
pub mod error;
pub mod ident;
pub mod idmap;
pub mod model;
pub mod protocol;
pub mod queue;
pub mod resolve;
pub mod snapshot;
pub mod stock;
pub mod store;
pub mod timestamp;
pub mod transport;

// Re-export main types at crate root
pub use daycycle::{CategorySync, DayCycleController, DayStart, InventorySync, SyncOutcome};
pub use error::{Error, PreconditionFailure, Result, Violation};
pub use ident::{EntityRef, LocalHandle};
pub use idmap::{IdMap, IdentifierMapping, MappingReport, OrderBatch};
pub use model::{
    Category, InventoryTransaction, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus,
    Product, ReviewFlag, Versioned,
};
pub use queue::{ChangeAction, ChangeQueue, ChangeQueueEntry, PendingChange, Table};
pub use resolve::{Conflict, MergeReport, Resolution};
pub use snapshot::{StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use stock::{RebaseReport, StockLevel};
pub use store::{Entity, LocalStore, MemoryTable, RecordStore};
pub use timestamp::Timestamp;
pub use transport::SyncTransport;

/// Type aliases for clarity
pub type ServerId = i64;
pub type Quantity = u32;
pub type StockDelta = i64;
