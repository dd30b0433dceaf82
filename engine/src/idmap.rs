//! Identifier reconciliation.
//!
//! Locally created orders and categories travel to the server under their
//! [`LocalHandle`]. The server answers with `(localId, serverId)` pairs and
//! this module rewrites every local reference to the issued id. Dependent
//! records whose parent has no mapping are never sent.

use crate::{
    error::Result,
    protocol::{PushItem, PushOrder, SyncOrder, SyncOrderItem},
    ChangeAction, EntityRef, LocalHandle, LocalStore, Order, OrderItem, RecordStore, ServerId,
    Table, Violation,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One accepted create: the client's handle and the id the server issued.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifierMapping {
    pub local_id: LocalHandle,
    pub server_id: ServerId,
}

impl IdentifierMapping {
    pub fn new(local_id: LocalHandle, server_id: ServerId) -> Self {
        Self {
            local_id,
            server_id,
        }
    }
}

/// Lookup table built from the mappings of one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdMap {
    entries: Vec<IdentifierMapping>,
    by_local: HashMap<LocalHandle, ServerId>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping. The first mapping for a handle wins.
    pub fn insert(&mut self, local_id: LocalHandle, server_id: ServerId) {
        if self.by_local.contains_key(&local_id) {
            return;
        }
        self.by_local.insert(local_id.clone(), server_id);
        self.entries.push(IdentifierMapping::new(local_id, server_id));
    }

    pub fn get(&self, local_id: &LocalHandle) -> Option<ServerId> {
        self.by_local.get(local_id).copied()
    }

    /// Resolve a reference into server space, if possible.
    pub fn resolve(&self, reference: &EntityRef) -> Option<ServerId> {
        match reference {
            EntityRef::Remote(id) => Some(*id),
            EntityRef::Local(handle) => self.get(handle),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn mappings(&self) -> &[IdentifierMapping] {
        &self.entries
    }
}

impl FromIterator<IdentifierMapping> for IdMap {
    fn from_iter<I: IntoIterator<Item = IdentifierMapping>>(iter: I) -> Self {
        let mut map = Self::new();
        for mapping in iter {
            map.insert(mapping.local_id, mapping.server_id);
        }
        map
    }
}

/// An order and its lines, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// A record kept out of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withheld {
    pub handle: LocalHandle,
    pub violation: Violation,
}

/// Orders to push this cycle, parents always ahead of their lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBatch {
    pub orders: Vec<PlannedOrder>,
    /// Lines whose parent order cannot be mapped
    pub withheld: Vec<Withheld>,
}

impl OrderBatch {
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn handles(&self) -> Vec<LocalHandle> {
        self.orders.iter().map(|p| p.order.handle.clone()).collect()
    }

    /// Nested form for the authoritative push.
    pub fn to_push_orders(&self) -> Vec<PushOrder> {
        self.orders
            .iter()
            .map(|planned| PushOrder {
                id: planned.order.handle.clone(),
                total: planned.order.total,
                status: planned.order.status,
                items: planned
                    .items
                    .iter()
                    .map(|item| PushItem {
                        product_id: item.product_id,
                        quantity: item.quantity,
                        price: item.price,
                    })
                    .collect(),
            })
            .collect()
    }

    /// Flat form for the remap flow. Orders come first, then every line
    /// referencing its parent by handle.
    pub fn to_flat(&self) -> (Vec<SyncOrder>, Vec<SyncOrderItem>) {
        let orders = self
            .orders
            .iter()
            .map(|planned| SyncOrder {
                id: None,
                local_id: planned.order.handle.clone(),
                total: planned.order.total,
                status: planned.order.status,
                updated_at: planned.order.updated_at,
            })
            .collect();
        let items = self
            .orders
            .iter()
            .flat_map(|planned| {
                planned.items.iter().map(|item| SyncOrderItem {
                    local_id: Some(item.handle.clone()),
                    order_id: None,
                    local_order_id: Some(planned.order.handle.clone()),
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                })
            })
            .collect();
        (orders, items)
    }
}

/// Collect unsynced, unflagged orders with their lines.
///
/// Lines pointing at a local order that is missing, or that was synced
/// without the line being rewritten, are withheld rather than sent with a
/// dangling reference.
pub fn plan_order_batch(store: &LocalStore) -> OrderBatch {
    let mut pushable: Vec<&Order> = store.orders().scan(Order::is_pushable);
    pushable.sort_by(|a, b| {
        a.updated_at
            .cmp(&b.updated_at)
            .then_with(|| a.handle.cmp(&b.handle))
    });

    let orders = pushable
        .into_iter()
        .map(|order| PlannedOrder {
            order: order.clone(),
            items: store
                .items_for_order(&order.handle)
                .into_iter()
                .cloned()
                .collect(),
        })
        .collect();

    let withheld = store
        .order_items()
        .scan(|item| item.review.is_none())
        .into_iter()
        .filter_map(|item| {
            let parent = item.order.local_handle()?;
            let mappable = store.orders().get(parent).is_some_and(|o| !o.synced);
            (!mappable).then(|| Withheld {
                handle: item.handle.clone(),
                violation: Violation::UnmappedParent {
                    item: item.handle.clone(),
                    order: parent.clone(),
                },
            })
        })
        .collect();

    OrderBatch { orders, withheld }
}

/// What applying a mapping list did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingReport {
    /// Orders now in server space
    pub mapped: Vec<LocalHandle>,
    /// Lines whose parent reference was rewritten
    pub rewritten_items: usize,
    /// Mappings that did not match anything that was sent
    pub ignored: Vec<LocalHandle>,
}

/// Move accepted orders into server space.
///
/// Only handles in `sent` are honoured, so a confused response cannot mark
/// an order synced that was never pushed. Each mapped order gets its id
/// replaced, `synced` set, and every line referencing it rewritten before
/// anything else reads the store.
pub fn apply_order_mappings(
    store: &mut LocalStore,
    mappings: &[IdentifierMapping],
    sent: &[LocalHandle],
) -> MappingReport {
    let mut report = MappingReport::default();
    for mapping in mappings {
        let handle = &mapping.local_id;
        if !sent.contains(handle) {
            tracing::warn!(local_id = %handle, "mapping for an order that was not sent");
            report.ignored.push(handle.clone());
            continue;
        }
        let Some(order) = store.orders.get_mut(handle) else {
            report.ignored.push(handle.clone());
            continue;
        };
        if order.synced {
            // already mapped; the first mapping stands
            continue;
        }
        order.id = EntityRef::Remote(mapping.server_id);
        order.synced = true;
        order.review = None;
        store.queue.acknowledge_key(Table::Orders, handle.as_str());

        for item in store
            .order_items
            .scan_mut(|item| item.order.is_local_handle(handle))
        {
            item.order = EntityRef::Remote(mapping.server_id);
            store.queue.acknowledge_key(Table::OrderItems, item.handle.as_str());
            report.rewritten_items += 1;
        }

        tracing::debug!(local_id = %handle, server_id = mapping.server_id, "order mapped");
        report.mapped.push(handle.clone());
    }
    report
}

/// Move accepted categories into server space.
///
/// The local copy is re-keyed under its server id so the following merge
/// can compare it with the server version. Edits queued after the push was
/// built are re-queued under the new key.
pub fn apply_category_mappings(
    store: &mut LocalStore,
    mappings: &[IdentifierMapping],
) -> Result<usize> {
    let mut rekeyed = 0;
    for mapping in mappings {
        let old_key = EntityRef::Local(mapping.local_id.clone());
        let Some(mut category) = store.categories.delete(&old_key) else {
            continue;
        };
        category.id = EntityRef::Remote(mapping.server_id);

        let old_key = old_key.to_string();
        let still_pending = store
            .queue
            .pending(Table::Categories)
            .any(|entry| entry.key == old_key);
        store.queue.acknowledge_key(Table::Categories, &old_key);
        if still_pending {
            store
                .queue
                .append(ChangeAction::Update, &category, category.updated_at)?;
        }

        store.categories.put(category);
        rekeyed += 1;
    }
    Ok(rekeyed)
}

/// Lines that reference a local order with no server counterpart in reach:
/// the parent is missing, or it is synced but the line was not rewritten.
pub fn dangling_references(store: &LocalStore) -> Vec<LocalHandle> {
    store
        .order_items()
        .scan(|item| match item.order.local_handle() {
            Some(parent) => store.orders().get(parent).map_or(true, |o| o.synced),
            None => false,
        })
        .into_iter()
        .map(|item| item.handle.clone())
        .collect()
}
