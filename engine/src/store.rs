//! Record stores and the local replica handle.
//!
//! [`RecordStore`] is the contract the reconciler needs from a storage
//! engine: get, put, delete and scan. [`MemoryTable`] is the in-process
//! implementation used by the client replica, and [`LocalStore`] bundles one
//! table per entity with the change queue into the handle that gets passed
//! to the day-cycle controller.

use crate::{
    error::Result, stock, Category, ChangeAction, ChangeQueue, EntityRef, Error,
    InventoryTransaction, LocalHandle, NewOrder, Order, OrderItem, PreconditionFailure, Product,
    ReviewFlag, ServerId, StockDelta, StockLevel, Table, Timestamp, Violation,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::path::PathBuf;

/// A record that lives in a keyed table.
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned {
    type Key: Clone + Ord + Debug + Display;
    const TABLE: Table;

    fn key(&self) -> Self::Key;
}

/// Key-indexed storage for one entity type.
pub trait RecordStore<T: Entity> {
    fn get(&self, key: &T::Key) -> Option<&T>;

    /// Insert or replace. Returns the previous record under the same key.
    fn put(&mut self, record: T) -> Option<T>;

    fn delete(&mut self, key: &T::Key) -> Option<T>;

    /// All records matching `predicate`, in key order.
    fn scan<F>(&self, predicate: F) -> Vec<&T>
    where
        F: Fn(&T) -> bool;

    fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        self.scan(predicate).len()
    }

    fn clear(&mut self);
}

/// In-memory table ordered by key.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryTable<T: Entity> {
    records: BTreeMap<T::Key, T>,
}

impl<T: Entity> Default for MemoryTable<T> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
        }
    }
}

impl<T: Entity> MemoryTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_mut(&mut self, key: &T::Key) -> Option<&mut T> {
        self.records.get_mut(key)
    }

    /// Mutable access to every record matching `predicate`.
    pub fn scan_mut<F>(&mut self, predicate: F) -> impl Iterator<Item = &mut T>
    where
        F: Fn(&T) -> bool,
    {
        self.records.values_mut().filter(move |r| predicate(r))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T: Entity> RecordStore<T> for MemoryTable<T> {
    fn get(&self, key: &T::Key) -> Option<&T> {
        self.records.get(key)
    }

    fn put(&mut self, record: T) -> Option<T> {
        self.records.insert(record.key(), record)
    }

    fn delete(&mut self, key: &T::Key) -> Option<T> {
        self.records.remove(key)
    }

    fn scan<F>(&self, predicate: F) -> Vec<&T>
    where
        F: Fn(&T) -> bool,
    {
        self.records.values().filter(|r| predicate(r)).collect()
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

impl<T: Entity> FromIterator<T> for MemoryTable<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut table = Self::new();
        for record in iter {
            table.put(record);
        }
        table
    }
}

/// The client replica: one table per entity plus the change queue.
///
/// Opened once per process and handed to the controller explicitly.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pub(crate) node_id: String,
    pub(crate) categories: MemoryTable<Category>,
    pub(crate) products: MemoryTable<Product>,
    pub(crate) inventory: MemoryTable<InventoryTransaction>,
    pub(crate) orders: MemoryTable<Order>,
    pub(crate) order_items: MemoryTable<OrderItem>,
    pub(crate) queue: ChangeQueue,
    /// Where `save` writes the snapshot, if the store was opened from disk
    pub(crate) path: Option<PathBuf>,
}

impl LocalStore {
    /// An empty in-memory replica.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            categories: MemoryTable::new(),
            products: MemoryTable::new(),
            inventory: MemoryTable::new(),
            orders: MemoryTable::new(),
            order_items: MemoryTable::new(),
            queue: ChangeQueue::new(),
            path: None,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn categories(&self) -> &MemoryTable<Category> {
        &self.categories
    }

    pub fn categories_mut(&mut self) -> &mut MemoryTable<Category> {
        &mut self.categories
    }

    pub fn products(&self) -> &MemoryTable<Product> {
        &self.products
    }

    pub fn products_mut(&mut self) -> &mut MemoryTable<Product> {
        &mut self.products
    }

    pub fn inventory(&self) -> &MemoryTable<InventoryTransaction> {
        &self.inventory
    }

    pub fn orders(&self) -> &MemoryTable<Order> {
        &self.orders
    }

    pub fn order_items(&self) -> &MemoryTable<OrderItem> {
        &self.order_items
    }

    pub fn queue(&self) -> &ChangeQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut ChangeQueue {
        &mut self.queue
    }

    /// Number of orders the server has not confirmed yet, flagged ones included.
    pub fn unsynced_order_count(&self) -> usize {
        self.orders.count(|o| !o.synced)
    }

    /// Items that belong to a local order.
    pub fn items_for_order(&self, handle: &LocalHandle) -> Vec<&OrderItem> {
        self.order_items.scan(|item| item.order.is_local_handle(handle))
    }

    /// Add a category created on this client and queue it for push.
    pub fn create_category(
        &mut self,
        title: impl Into<String>,
        completed: bool,
        now: Timestamp,
    ) -> Result<EntityRef> {
        let category = Category::new_local(title, completed, now);
        let id = category.id.clone();
        self.queue.append(ChangeAction::Create, &category, now)?;
        self.categories.put(category);
        Ok(id)
    }

    /// Edit a category and queue the new version for push.
    pub fn update_category(
        &mut self,
        id: &EntityRef,
        title: impl Into<String>,
        completed: bool,
        now: Timestamp,
    ) -> Result<()> {
        let category = self
            .categories
            .get_mut(id)
            .ok_or_else(|| Error::not_found(Table::Categories, id))?;
        category.title = title.into();
        category.completed = completed;
        category.updated_at = now;
        let snapshot = category.clone();
        self.queue.append(ChangeAction::Update, &snapshot, now)?;
        Ok(())
    }

    /// Ring up a sale offline.
    ///
    /// Local stock is decremented immediately. The whole sale is refused if
    /// any line names a product missing from the catalog or would drive its
    /// stock negative.
    pub fn create_order(&mut self, order: NewOrder, now: Timestamp) -> Result<LocalHandle> {
        for item in &order.items {
            if item.quantity == 0 {
                return Err(Error::InvariantViolation(Violation::ZeroQuantity {
                    product_id: item.product_id,
                }));
            }
        }

        let deltas = stock::sale_deltas(order.items.iter().map(|i| (i.product_id, i.quantity)));
        stock::apply_local_deltas(&mut self.products, &deltas)?;

        let handle = LocalHandle::generate();
        let record = Order {
            handle: handle.clone(),
            id: EntityRef::Local(handle.clone()),
            total: order.total,
            status: order.status,
            updated_at: now,
            synced: false,
            review: None,
        };
        self.queue.append(ChangeAction::Create, &record, now)?;
        self.orders.put(record);

        for item in order.items {
            let line = OrderItem {
                handle: LocalHandle::generate(),
                order: EntityRef::Local(handle.clone()),
                product_id: item.product_id,
                quantity: item.quantity,
                price: item.price,
                review: None,
            };
            self.queue.append(ChangeAction::Create, &line, now)?;
            self.order_items.put(line);
        }

        tracing::debug!(order = %handle, "order created locally");
        Ok(handle)
    }

    /// Record a stock correction and apply it to local stock.
    pub fn record_adjustment(
        &mut self,
        product_id: ServerId,
        change: StockDelta,
        reason: impl Into<String>,
        now: Timestamp,
    ) -> Result<LocalHandle> {
        if change == 0 {
            return Err(Error::InvariantViolation(Violation::ZeroChange { product_id }));
        }
        let product = self
            .products
            .get_mut(&product_id)
            .ok_or(Error::InvariantViolation(Violation::UnknownProduct(product_id)))?;
        product.stock = stock::apply_delta(product_id, product.stock, change)?;

        let transaction = InventoryTransaction {
            handle: LocalHandle::generate(),
            product_id,
            change,
            reason: reason.into(),
            updated_at: now,
            synced: false,
            review: None,
        };
        let handle = transaction.handle.clone();
        self.queue.append(ChangeAction::Create, &transaction, now)?;
        self.inventory.put(transaction);
        Ok(handle)
    }

    /// Pull an order out of sync batches until an operator releases it.
    pub fn flag_order(&mut self, handle: &LocalHandle, reason: impl Into<String>) -> Result<()> {
        let order = self
            .orders
            .get_mut(handle)
            .ok_or_else(|| Error::not_found(Table::Orders, handle))?;
        order.review = Some(ReviewFlag::new(reason));
        Ok(())
    }

    /// Pull an order item out of sync batches.
    pub fn flag_order_item(&mut self, handle: &LocalHandle, reason: impl Into<String>) -> Result<()> {
        let item = self
            .order_items
            .get_mut(handle)
            .ok_or_else(|| Error::not_found(Table::OrderItems, handle))?;
        item.review = Some(ReviewFlag::new(reason));
        Ok(())
    }

    /// Pull an inventory transaction out of sync batches.
    pub fn flag_transaction(&mut self, handle: &LocalHandle, reason: impl Into<String>) -> Result<()> {
        let transaction = self
            .inventory
            .get_mut(handle)
            .ok_or_else(|| Error::not_found(Table::Inventory, handle))?;
        transaction.review = Some(ReviewFlag::new(reason));
        Ok(())
    }

    /// Clear a review flag so the record rejoins the next batch.
    pub fn release_for_retry(&mut self, handle: &LocalHandle) -> Result<()> {
        let released = if let Some(order) = self.orders.get_mut(handle) {
            order.review.take().is_some()
        } else if let Some(item) = self.order_items.get_mut(handle) {
            item.review.take().is_some()
        } else if let Some(transaction) = self.inventory.get_mut(handle) {
            transaction.review.take().is_some()
        } else {
            return Err(Error::not_found(Table::Orders, handle));
        };

        if !released {
            return Err(Error::Precondition(PreconditionFailure::NotFlagged(
                handle.clone(),
            )));
        }
        Ok(())
    }

    /// Sale deltas of every order the server has not confirmed yet.
    pub fn pending_sale_deltas(&self) -> BTreeMap<ServerId, StockDelta> {
        let unsynced: Vec<&LocalHandle> = self
            .orders
            .scan(|o| !o.synced)
            .into_iter()
            .map(|o| &o.handle)
            .collect();
        stock::sale_deltas(
            self.order_items
                .scan(|item| {
                    item.order
                        .local_handle()
                        .is_some_and(|h| unsynced.contains(&h))
                })
                .into_iter()
                .map(|item| (item.product_id, item.quantity)),
        )
    }

    /// Every local stock movement the server has not folded in yet: sales of
    /// unsynced orders plus unsynced adjustments.
    pub fn pending_stock_deltas(&self) -> BTreeMap<ServerId, StockDelta> {
        let mut deltas = self.pending_sale_deltas();
        for transaction in self.inventory.scan(|t| !t.synced) {
            *deltas.entry(transaction.product_id).or_insert(0) += transaction.change;
        }
        deltas
    }

    /// Discard the local working set and replace the catalog.
    ///
    /// **Destroys data.** Every product, order and order item is removed and
    /// their queue entries are dropped. Callers must check that no unsynced
    /// orders exist first; this method does not.
    ///
    /// Inventory adjustments survive the reset. Those the server has not
    /// seen yet are re-applied on top of the new catalog stock.
    pub fn reset_working_set(&mut self, products: Vec<Product>) -> usize {
        self.products.clear();
        self.orders.clear();
        self.order_items.clear();
        for table in [Table::Products, Table::Orders, Table::OrderItems] {
            self.queue.acknowledge_table(table);
        }
        self.queue.compact();

        let count = products.len();
        let levels: Vec<StockLevel> = products
            .iter()
            .map(|p| StockLevel {
                id: p.id,
                stock: p.stock,
            })
            .collect();
        for product in products {
            self.products.put(product);
        }

        let pending = self.pending_stock_deltas();
        if !pending.is_empty() {
            let report = stock::rebase_on_server(&mut self.products, &levels, &pending);
            tracing::debug!(
                rebased = pending.len(),
                overdrawn = ?report.overdrawn,
                "unsynced adjustments re-applied to catalog stock"
            );
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewOrderItem;
    use rust_decimal::Decimal;

    fn product(id: ServerId, stock: u32) -> Product {
        Product {
            id,
            name: format!("product-{id}"),
            price: Decimal::from(50),
            stock,
            category_id: None,
            updated_at: Timestamp::from_millis(1000),
        }
    }

    fn store_with_stock(stock: u32) -> LocalStore {
        let mut store = LocalStore::new("till-1");
        store.products_mut().put(product(1, stock));
        store
    }

    fn sale(quantity: u32) -> NewOrder {
        NewOrder {
            total: Decimal::from(100),
            status: Default::default(),
            items: vec![NewOrderItem {
                product_id: 1,
                quantity,
                price: Decimal::from(50),
            }],
        }
    }

    #[test]
    fn memory_table_crud() {
        let mut table: MemoryTable<Product> = MemoryTable::new();
        assert!(table.put(product(1, 5)).is_none());
        assert!(table.put(product(2, 0)).is_none());
        assert_eq!(table.get(&1).unwrap().stock, 5);

        let replaced = table.put(product(1, 7)).unwrap();
        assert_eq!(replaced.stock, 5);

        assert_eq!(table.count(|p| p.stock > 0), 1);
        assert!(table.delete(&2).is_some());
        assert_eq!(table.len(), 1);

        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn scan_returns_key_order() {
        let table: MemoryTable<Product> = vec![product(3, 1), product(1, 1), product(2, 1)]
            .into_iter()
            .collect();
        let ids: Vec<_> = table.scan(|_| true).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn create_order_decrements_stock_and_queues() {
        let mut store = store_with_stock(10);
        let handle = store.create_order(sale(2), Timestamp::from_millis(5)).unwrap();

        assert_eq!(store.products().get(&1).unwrap().stock, 8);
        let order = store.orders().get(&handle).unwrap();
        assert!(!order.synced);
        assert_eq!(order.id, EntityRef::Local(handle.clone()));
        assert_eq!(store.items_for_order(&handle).len(), 1);
        assert_eq!(store.queue().pending_count(Table::Orders), 1);
        assert_eq!(store.queue().pending_count(Table::OrderItems), 1);
        assert_eq!(store.unsynced_order_count(), 1);
    }

    #[test]
    fn overselling_is_refused_without_side_effects() {
        let mut store = store_with_stock(1);
        let err = store.create_order(sale(2), Timestamp::from_millis(5)).unwrap_err();
        assert!(matches!(
            err,
            Error::InvariantViolation(Violation::NegativeStock { product_id: 1, .. })
        ));
        assert_eq!(store.products().get(&1).unwrap().stock, 1);
        assert!(store.orders().is_empty());
        assert!(store.queue().is_empty());
    }

    #[test]
    fn zero_quantity_is_refused() {
        let mut store = store_with_stock(5);
        let err = store.create_order(sale(0), Timestamp::from_millis(5)).unwrap_err();
        assert!(matches!(
            err,
            Error::InvariantViolation(Violation::ZeroQuantity { product_id: 1 })
        ));
    }

    #[test]
    fn adjustment_applies_delta() {
        let mut store = store_with_stock(5);
        let handle = store
            .record_adjustment(1, 3, "delivery", Timestamp::from_millis(5))
            .unwrap();
        assert_eq!(store.products().get(&1).unwrap().stock, 8);
        assert!(store.inventory().get(&handle).unwrap().is_pushable());

        let err = store
            .record_adjustment(1, -9, "shrinkage", Timestamp::from_millis(6))
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert_eq!(store.products().get(&1).unwrap().stock, 8);
    }

    #[test]
    fn update_category_queues_new_version() {
        let mut store = LocalStore::new("till-1");
        let id = store
            .create_category("Drinks", false, Timestamp::from_millis(1))
            .unwrap();
        store
            .update_category(&id, "Cold drinks", true, Timestamp::from_millis(2))
            .unwrap();

        let category = store.categories().get(&id).unwrap();
        assert_eq!(category.title, "Cold drinks");
        assert_eq!(category.updated_at, Timestamp::from_millis(2));
        assert_eq!(store.queue().pending_count(Table::Categories), 2);

        let missing = store.update_category(&EntityRef::Remote(99), "x", false, Timestamp::from_millis(3));
        assert!(matches!(missing, Err(Error::NotFound { .. })));
    }

    #[test]
    fn flag_and_release() {
        let mut store = store_with_stock(10);
        let handle = store.create_order(sale(1), Timestamp::from_millis(5)).unwrap();

        store.flag_order(&handle, "needs review").unwrap();
        assert!(!store.orders().get(&handle).unwrap().is_pushable());

        store.release_for_retry(&handle).unwrap();
        assert!(store.orders().get(&handle).unwrap().is_pushable());

        let again = store.release_for_retry(&handle);
        assert!(matches!(again, Err(Error::Precondition(_))));
    }

    #[test]
    fn pending_sale_deltas_cover_unsynced_orders_only() {
        let mut store = store_with_stock(10);
        let first = store.create_order(sale(2), Timestamp::from_millis(5)).unwrap();
        store.create_order(sale(3), Timestamp::from_millis(6)).unwrap();

        store.orders.get_mut(&first).unwrap().synced = true;
        let deltas = store.pending_sale_deltas();
        assert_eq!(deltas.get(&1), Some(&-3));

        store
            .record_adjustment(1, 4, "delivery", Timestamp::from_millis(7))
            .unwrap();
        assert_eq!(store.pending_stock_deltas().get(&1), Some(&1));
    }

    #[test]
    fn reset_working_set_replaces_catalog() {
        let mut store = store_with_stock(10);
        store.create_order(sale(2), Timestamp::from_millis(5)).unwrap();
        store.create_category("Drinks", false, Timestamp::from_millis(5)).unwrap();

        let count = store.reset_working_set(vec![product(2, 4), product(3, 9)]);
        assert_eq!(count, 2);
        assert!(store.products().get(&1).is_none());
        assert!(store.orders().is_empty());
        assert!(store.order_items().is_empty());
        assert_eq!(store.queue().pending_count(Table::Orders), 0);
        // categories are not part of the working set
        assert_eq!(store.queue().pending_count(Table::Categories), 1);
    }

    #[test]
    fn reset_working_set_reapplies_unsynced_adjustments() {
        let mut store = store_with_stock(10);
        store
            .record_adjustment(1, -3, "breakage", Timestamp::from_millis(5))
            .unwrap();

        store.reset_working_set(vec![product(1, 10), product(2, 4)]);
        assert_eq!(store.products().get(&1).unwrap().stock, 7);
        assert_eq!(store.products().get(&2).unwrap().stock, 4);
        assert_eq!(store.inventory().len(), 1);
    }
}
