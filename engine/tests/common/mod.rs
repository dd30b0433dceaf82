//! In-memory authoritative replica for integration tests.
//!
//! Applies the same rules as the possync server: idempotent creates keyed by
//! the client's local handle, stock as checked deltas, whole-record LWW for
//! categories.

#![allow(dead_code)]

use possync_engine::{
    protocol::*,
    resolve::{server_merge, ServerMerge},
    stock::apply_delta,
    Category, Error, IdentifierMapping, LocalHandle, NewOrder, NewOrderItem, Product, Result,
    ServerId, StockLevel, SyncTransport, Timestamp,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    pub id: ServerId,
    pub local_ref: LocalHandle,
    pub node_id: String,
    pub total: Decimal,
    pub items: Vec<PushItem>,
}

#[derive(Debug, Default)]
struct ServerState {
    products: BTreeMap<ServerId, Product>,
    categories: BTreeMap<ServerId, ServerCategory>,
    category_refs: HashMap<LocalHandle, ServerId>,
    orders: Vec<StoredOrder>,
    order_refs: HashMap<LocalHandle, ServerId>,
    inventory_refs: BTreeSet<LocalHandle>,
    next_id: ServerId,
}

impl ServerState {
    fn issue_id(&mut self) -> ServerId {
        self.next_id += 1;
        self.next_id
    }

    /// One order in one "transaction": all stock deltas land or none do.
    fn create_order(
        &mut self,
        node_id: &str,
        local_ref: &LocalHandle,
        total: Decimal,
        items: &[PushItem],
    ) -> std::result::Result<ServerId, RejectedRecord> {
        if let Some(&id) = self.order_refs.get(local_ref) {
            return Ok(id);
        }

        let mut next = BTreeMap::new();
        for item in items {
            if item.quantity == 0 {
                return Err(rejected(local_ref, "zero quantity", RejectionKind::Invalid));
            }
            let current = match next.get(&item.product_id) {
                Some(&stock) => stock,
                None => match self.products.get(&item.product_id) {
                    Some(product) => product.stock,
                    None => {
                        return Err(rejected(
                            local_ref,
                            &format!("unknown product {}", item.product_id),
                            RejectionKind::Invariant,
                        ))
                    }
                },
            };
            match apply_delta(item.product_id, current, -i64::from(item.quantity)) {
                Ok(stock) => {
                    next.insert(item.product_id, stock);
                }
                Err(e) => return Err(rejected(local_ref, &e.to_string(), RejectionKind::Invariant)),
            }
        }

        for (product_id, stock) in next {
            if let Some(product) = self.products.get_mut(&product_id) {
                product.stock = stock;
            }
        }
        let id = self.issue_id();
        self.order_refs.insert(local_ref.clone(), id);
        self.orders.push(StoredOrder {
            id,
            local_ref: local_ref.clone(),
            node_id: node_id.to_string(),
            total,
            items: items.to_vec(),
        });
        Ok(id)
    }

    fn stock_of(&self, ids: impl IntoIterator<Item = ServerId>) -> Vec<StockLevel> {
        ids.into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| self.products.get(&id))
            .map(|p| StockLevel {
                id: p.id,
                stock: p.stock,
            })
            .collect()
    }
}

fn rejected(local_ref: &LocalHandle, reason: &str, kind: RejectionKind) -> RejectedRecord {
    RejectedRecord {
        local_id: local_ref.clone(),
        reason: reason.to_string(),
        kind,
    }
}

/// Shared handle to the in-memory server. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
    offline: Arc<AtomicBool>,
    lose_next_response: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: Vec<Product>) -> Self {
        let server = Self::new();
        {
            let mut state = server.state.lock().unwrap();
            for product in products {
                state.next_id = state.next_id.max(product.id);
                state.products.insert(product.id, product);
            }
        }
        server
    }

    /// Next issued identifier will be `id`.
    pub fn issue_next(&self, id: ServerId) {
        self.state.lock().unwrap().next_id = id - 1;
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Apply the next request but fail the call as if the response was lost.
    pub fn lose_next_response(&self) {
        self.lose_next_response.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stock(&self, product_id: ServerId) -> Option<u32> {
        self.state
            .lock()
            .unwrap()
            .products
            .get(&product_id)
            .map(|p| p.stock)
    }

    pub fn set_stock(&self, product_id: ServerId, stock: u32) {
        if let Some(product) = self.state.lock().unwrap().products.get_mut(&product_id) {
            product.stock = stock;
        }
    }

    /// Take a product out of the catalog.
    pub fn remove_product(&self, product_id: ServerId) {
        self.state.lock().unwrap().products.remove(&product_id);
    }

    pub fn orders(&self) -> Vec<StoredOrder> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn categories(&self) -> Vec<ServerCategory> {
        self.state
            .lock()
            .unwrap()
            .categories
            .values()
            .cloned()
            .collect()
    }

    pub fn put_category(&self, category: ServerCategory) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(category.id);
        state.categories.insert(category.id, category);
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Transport {
                message: "connection refused".into(),
                retryable: true,
            });
        }
        Ok(())
    }

    fn leave<T>(&self, response: T) -> Result<T> {
        if self.lose_next_response.swap(false, Ordering::SeqCst) {
            return Err(Error::Transport {
                message: "response lost".into(),
                retryable: true,
            });
        }
        Ok(response)
    }
}

impl SyncTransport for MemoryServer {
    async fn sync_categories(
        &self,
        request: &SyncCategoriesRequest,
    ) -> Result<SyncCategoriesResponse> {
        self.enter()?;
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let mut id_map = Vec::new();

        for incoming in &request.categories {
            if let Some(local_id) = &incoming.local_id {
                if let Some(&id) = state.category_refs.get(local_id) {
                    id_map.push(IdentifierMapping::new(local_id.clone(), id));
                    continue;
                }
            }
            let category = incoming.clone().into_category();
            let existing = category
                .id
                .server_id()
                .and_then(|id| state.categories.get(&id))
                .cloned()
                .map(Category::from);
            let id = match server_merge(&category, existing.as_ref()) {
                ServerMerge::Create => {
                    let id = state.issue_id();
                    if let Some(local_id) = category.id.local_handle() {
                        state.category_refs.insert(local_id.clone(), id);
                        id_map.push(IdentifierMapping::new(local_id.clone(), id));
                    }
                    id
                }
                ServerMerge::CreateWithId(id) | ServerMerge::Update(id) => id,
                ServerMerge::Keep(_) => continue,
            };
            state.categories.insert(
                id,
                ServerCategory {
                    id,
                    title: category.title,
                    completed: category.completed,
                    updated_at: category.updated_at,
                },
            );
        }

        let response = SyncCategoriesResponse {
            server_categories: state.categories.values().cloned().collect(),
            id_map,
        };
        drop(guard);
        self.leave(response)
    }

    async fn sync_inventory(&self, request: &SyncInventoryRequest) -> Result<SyncInventoryResponse> {
        self.enter()?;
        let mut state = self.state.lock().unwrap();
        let mut accepted = Vec::new();
        let mut rejected_records = Vec::new();
        let mut touched = Vec::new();

        for transaction in &request.transactions {
            let Some(local_id) = transaction.local_id.clone() else {
                continue;
            };
            touched.push(transaction.product_id);
            if state.inventory_refs.contains(&local_id) {
                accepted.push(local_id);
                continue;
            }
            let Some(product) = state.products.get_mut(&transaction.product_id) else {
                rejected_records.push(rejected(&local_id, "unknown product", RejectionKind::Invalid));
                continue;
            };
            match apply_delta(product.id, product.stock, transaction.change) {
                Ok(stock) => {
                    product.stock = stock;
                    state.inventory_refs.insert(local_id.clone());
                    accepted.push(local_id);
                }
                Err(e) => rejected_records.push(rejected(
                    &local_id,
                    &e.to_string(),
                    RejectionKind::Invariant,
                )),
            }
        }

        let response = SyncInventoryResponse {
            success: rejected_records.is_empty(),
            accepted,
            rejected: rejected_records,
            server_stock: state.stock_of(touched),
        };
        drop(state);
        self.leave(response)
    }

    async fn sync_orders(&self, request: &SyncOrdersRequest) -> Result<SyncOrdersResponse> {
        self.enter()?;
        let mut state = self.state.lock().unwrap();
        let mut id_map = Vec::new();
        let mut rejected_records = Vec::new();
        let mut touched = Vec::new();

        for order in &request.orders {
            let items: Vec<PushItem> = request
                .order_items
                .iter()
                .filter(|item| item.local_order_id.as_ref() == Some(&order.local_id))
                .map(|item| PushItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect();
            touched.extend(items.iter().map(|i| i.product_id));
            match state.create_order(&request.node_id, &order.local_id, order.total, &items) {
                Ok(id) => id_map.push(IdentifierMapping::new(order.local_id.clone(), id)),
                Err(record) => rejected_records.push(record),
            }
        }

        let response = SyncOrdersResponse {
            success: rejected_records.is_empty(),
            id_map,
            rejected: rejected_records,
            server_stock: state.stock_of(touched),
        };
        drop(state);
        self.leave(response)
    }

    async fn push(&self, request: &PushRequest) -> Result<PushResponse> {
        self.enter()?;
        let mut state = self.state.lock().unwrap();
        let mut id_map = Vec::new();
        let mut rejected_records = Vec::new();
        let mut touched = Vec::new();

        for order in &request.orders {
            touched.extend(order.items.iter().map(|i| i.product_id));
            match state.create_order(&request.node_id, &order.id, order.total, &order.items) {
                Ok(id) => id_map.push(IdentifierMapping::new(order.id.clone(), id)),
                Err(record) => rejected_records.push(record),
            }
        }

        let response = PushResponse {
            id_map,
            server_stock: state.stock_of(touched),
            rejected: rejected_records,
        };
        drop(state);
        self.leave(response)
    }

    async fn pull_catalog(&self) -> Result<CatalogResponse> {
        self.enter()?;
        let state = self.state.lock().unwrap();
        let response = CatalogResponse {
            products: state.products.values().cloned().collect(),
            categories: state.categories.values().cloned().collect(),
        };
        drop(state);
        self.leave(response)
    }
}

pub fn product(id: ServerId, stock: u32, price: i64) -> Product {
    Product {
        id,
        name: format!("product-{id}"),
        price: Decimal::from(price),
        stock,
        category_id: None,
        updated_at: Timestamp::from_millis(1_700_000_000_000),
    }
}

/// A paid order of `quantity` units of one product.
pub fn sale(product_id: ServerId, quantity: u32, price: i64) -> NewOrder {
    NewOrder {
        total: Decimal::from(price) * Decimal::from(quantity),
        status: Default::default(),
        items: vec![NewOrderItem {
            product_id,
            quantity,
            price: Decimal::from(price),
        }],
    }
}
