//! Snapshot types for persisting and restoring the local replica.
//!
//! A snapshot is the bridge between the in-memory [`LocalStore`] and a file
//! on disk. Tables are written as key-ordered lists so the same store always
//! serializes to the same bytes.

use crate::{
    error::Result, Category, ChangeQueue, Error, InventoryTransaction, LocalStore, MemoryTable,
    Order, OrderItem, Product,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of every local table and the change queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Node ID of the store
    pub node_id: String,
    pub categories: Vec<Category>,
    pub products: Vec<Product>,
    pub inventory: Vec<InventoryTransaction>,
    pub orders: Vec<Order>,
    pub order_items: Vec<OrderItem>,
    /// Pending mutations not yet pushed
    pub queue: ChangeQueue,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            node_id: node_id.into(),
            categories: Vec::new(),
            products: Vec::new(),
            inventory: Vec::new(),
            orders: Vec::new(),
            order_items: Vec::new(),
            queue: ChangeQueue::new(),
        }
    }

    /// Count total records across all tables.
    pub fn record_count(&self) -> usize {
        self.categories.len()
            + self.products.len()
            + self.inventory.len()
            + self.orders.len()
            + self.order_items.len()
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

impl LocalStore {
    /// Copy the current state into a snapshot.
    pub fn export_state(&self) -> StoreSnapshot {
        StoreSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            node_id: self.node_id.clone(),
            categories: self.categories.iter().cloned().collect(),
            products: self.products.iter().cloned().collect(),
            inventory: self.inventory.iter().cloned().collect(),
            orders: self.orders.iter().cloned().collect(),
            order_items: self.order_items.iter().cloned().collect(),
            queue: self.queue.clone(),
        }
    }

    /// Replace the current state with a snapshot. The file path is kept.
    pub fn import_state(&mut self, snapshot: StoreSnapshot) {
        self.node_id = snapshot.node_id;
        self.categories = snapshot.categories.into_iter().collect::<MemoryTable<_>>();
        self.products = snapshot.products.into_iter().collect::<MemoryTable<_>>();
        self.inventory = snapshot.inventory.into_iter().collect::<MemoryTable<_>>();
        self.orders = snapshot.orders.into_iter().collect::<MemoryTable<_>>();
        self.order_items = snapshot.order_items.into_iter().collect::<MemoryTable<_>>();
        self.queue = snapshot.queue;
    }

    /// Open a replica backed by `path`.
    ///
    /// Loads the snapshot if the file exists, otherwise starts empty under
    /// `node_id`. A snapshot written by another node is refused.
    pub fn open(path: impl Into<PathBuf>, node_id: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let node_id = node_id.into();
        let mut store = LocalStore::new(node_id.clone());

        if path.exists() {
            let json = fs::read_to_string(&path)?;
            let snapshot = StoreSnapshot::from_json(&json)?;
            if snapshot.node_id != node_id {
                return Err(Error::InvalidSnapshot(format!(
                    "snapshot belongs to node {}, expected {}",
                    snapshot.node_id, node_id
                )));
            }
            tracing::debug!(path = %path.display(), records = snapshot.record_count(), "loaded local store");
            store.import_state(snapshot);
        }

        store.path = Some(path);
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the snapshot to the backing file, replacing it atomically.
    /// A store without a file is left alone.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = self.export_state().to_json()?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Persist and release the store.
    pub fn close(self) -> Result<()> {
        self.save()
    }
}
