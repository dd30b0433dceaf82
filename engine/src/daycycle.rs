//! Day-cycle controller.
//!
//! Orchestrates the two sync flows over an explicit store handle:
//!
//! - **Start of day** pulls the catalog and resets the local working set.
//!   Refused while any order is unsynced.
//! - **End of day** pushes unsynced orders, applies the returned identifier
//!   mappings and rebases local stock on the server snapshot.
//!
//! The controller keeps no state of its own between calls. Sync passes are
//! single-flight: a pass holds `sync_guard` for its whole duration, while the
//! store lock is only taken for the short synchronous steps on either side of
//! the network call.

use crate::{
    error::Result,
    idmap::{self, IdMap},
    protocol::{
        InventoryTransactionPayload, PushRequest, RejectedRecord, RejectionKind, SyncCategoriesRequest,
        SyncCategory, SyncInventoryRequest, SyncOrdersRequest,
    },
    resolve::{merge_remote_categories, MergeReport},
    stock::{rebase_on_server, RebaseReport},
    transport::SyncTransport,
    Category, EntityRef, Error, IdentifierMapping, LocalHandle, LocalStore, NewOrder,
    PendingChange, PreconditionFailure, RecordStore, ServerId, StockDelta, StockLevel, Table,
    Timestamp,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of a successful start of day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayStart {
    /// Products now in the local catalog
    pub products: usize,
    pub categories: MergeReport,
}

/// Outcome of an order push, reported distinctly so the operator knows
/// whether the next start of day is safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No unsynced orders; nothing was sent
    NothingToSync,
    /// Every order in the batch was accepted
    Synced { count: usize },
    /// Some records stay pending or were flagged for review
    Partial { synced: usize, failed: usize },
}

impl SyncOutcome {
    pub fn is_complete(&self) -> bool {
        !matches!(self, SyncOutcome::Partial { .. })
    }
}

/// Result of a category sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategorySync {
    pub sent: usize,
    /// Local categories that received a server id
    pub mapped: usize,
    pub merge: MergeReport,
}

/// Result of an inventory sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySync {
    pub accepted: usize,
    /// Rejected for validation; retried next time
    pub pending: usize,
    /// Rejected for an invariant; flagged for review
    pub flagged: usize,
}

/// Drives start of day, end of day and the auxiliary sync operations.
pub struct DayCycleController<T> {
    store: Arc<Mutex<LocalStore>>,
    transport: T,
    sync_guard: tokio::sync::Mutex<()>,
}

impl<T: SyncTransport> DayCycleController<T> {
    pub fn new(store: Arc<Mutex<LocalStore>>, transport: T) -> Self {
        Self {
            store,
            transport,
            sync_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// The store handle this controller works on.
    pub fn store(&self) -> &Arc<Mutex<LocalStore>> {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Pull the authoritative catalog and reset the local working set.
    ///
    /// Refused with [`PreconditionFailure::UnsyncedOrders`] while any order
    /// has `synced == false`, flagged ones included. The check runs again
    /// after the pull so an order rung up during the call is never wiped.
    /// On success every local product, order and order item is replaced.
    pub async fn start_of_day(&self) -> Result<DayStart> {
        let _pass = self.sync_guard.lock().await;

        self.check_no_unsynced_orders()?;
        let catalog = self.transport.pull_catalog().await?;

        let mut store = self.store.lock();
        let count = store.unsynced_order_count();
        if count > 0 {
            return Err(Error::Precondition(PreconditionFailure::UnsyncedOrders {
                count,
            }));
        }

        let products = store.reset_working_set(catalog.products);
        let remote: Vec<Category> = catalog.categories.into_iter().map(Category::from).collect();
        let categories = merge_remote_categories(store.categories_mut(), remote);

        tracing::info!(
            products,
            categories_inserted = categories.inserted,
            categories_overwritten = categories.overwritten,
            "start of day complete"
        );
        Ok(DayStart {
            products,
            categories,
        })
    }

    /// Push every unsynced order and absorb the server's answer.
    pub async fn end_of_day_sync(&self) -> Result<SyncOutcome> {
        let _pass = self.sync_guard.lock().await;

        let (sent, withheld, held_back, request) = {
            let store = self.store.lock();
            let batch = idmap::plan_order_batch(&store);
            let held_back = held_back_count(&store, &batch.withheld);
            let request = PushRequest {
                node_id: store.node_id().to_string(),
                orders: batch.to_push_orders(),
            };
            (batch.handles(), batch.withheld, held_back, request)
        };

        if sent.is_empty() {
            flag_withheld(&mut self.store.lock(), &withheld);
            return Ok(match held_back {
                0 => SyncOutcome::NothingToSync,
                failed => SyncOutcome::Partial { synced: 0, failed },
            });
        }

        tracing::debug!(orders = sent.len(), "pushing end-of-day batch");
        let response = self.transport.push(&request).await?;

        let outcome = {
            let mut store = self.store.lock();
            flag_withheld(&mut store, &withheld);
            absorb_orders(
                &mut store,
                &sent,
                &response.id_map,
                &response.rejected,
                &response.server_stock,
                held_back,
            )
        };
        tracing::info!(?outcome, "end of day sync complete");
        Ok(outcome)
    }

    /// Same as [`end_of_day_sync`](Self::end_of_day_sync) over the flat
    /// remap operation: orders and items travel as two lists and items
    /// refer to their parent by handle.
    pub async fn sync_orders(&self) -> Result<SyncOutcome> {
        let _pass = self.sync_guard.lock().await;

        let (sent, withheld, held_back, request) = {
            let store = self.store.lock();
            let batch = idmap::plan_order_batch(&store);
            let held_back = held_back_count(&store, &batch.withheld);
            let (orders, order_items) = batch.to_flat();
            let request = SyncOrdersRequest {
                node_id: store.node_id().to_string(),
                orders,
                order_items,
            };
            (batch.handles(), batch.withheld, held_back, request)
        };

        if sent.is_empty() {
            flag_withheld(&mut self.store.lock(), &withheld);
            return Ok(match held_back {
                0 => SyncOutcome::NothingToSync,
                failed => SyncOutcome::Partial { synced: 0, failed },
            });
        }

        let response = self.transport.sync_orders(&request).await?;
        if !response.success {
            tracing::warn!(rejected = response.rejected.len(), "server reported a partial order sync");
        }

        let outcome = {
            let mut store = self.store.lock();
            flag_withheld(&mut store, &withheld);
            absorb_orders(
                &mut store,
                &sent,
                &response.id_map,
                &response.rejected,
                &response.server_stock,
                held_back,
            )
        };
        tracing::info!(?outcome, "order sync complete");
        Ok(outcome)
    }

    /// Push pending category edits and merge the server list.
    pub async fn sync_categories(&self) -> Result<CategorySync> {
        let _pass = self.sync_guard.lock().await;

        let pending: Vec<PendingChange<Category>> = self.store.lock().queue().latest_pending()?;
        let request = SyncCategoriesRequest {
            categories: pending.iter().map(|c| SyncCategory::from(&c.record)).collect(),
        };

        let response = self.transport.sync_categories(&request).await?;

        let mut store = self.store.lock();
        let id_map: IdMap = response.id_map.iter().cloned().collect();
        let on_server: BTreeSet<ServerId> =
            response.server_categories.iter().map(|c| c.id).collect();

        let confirmed: Vec<u64> = pending
            .iter()
            .filter(|change| match &change.record.id {
                EntityRef::Local(handle) => id_map.get(handle).is_some(),
                EntityRef::Remote(id) => on_server.contains(id),
            })
            .flat_map(|change| change.seqs.iter().copied())
            .collect();
        store.queue_mut().acknowledge(&confirmed);

        let mapped = idmap::apply_category_mappings(&mut store, &response.id_map)?;
        let remote: Vec<Category> = response
            .server_categories
            .into_iter()
            .map(Category::from)
            .collect();
        let merge = merge_remote_categories(store.categories_mut(), remote);

        tracing::info!(
            sent = pending.len(),
            mapped,
            conflicts = merge.conflicts.len(),
            "category sync complete"
        );
        Ok(CategorySync {
            sent: pending.len(),
            mapped,
            merge,
        })
    }

    /// Push unsynced inventory transactions.
    pub async fn sync_inventory(&self) -> Result<InventorySync> {
        let _pass = self.sync_guard.lock().await;

        let transactions: Vec<InventoryTransactionPayload> = self
            .store
            .lock()
            .inventory()
            .scan(|t| t.is_pushable())
            .into_iter()
            .map(|t| InventoryTransactionPayload {
                local_id: Some(t.handle.clone()),
                product_id: t.product_id,
                change: t.change,
                reason: t.reason.clone(),
            })
            .collect();
        if transactions.is_empty() {
            return Ok(InventorySync::default());
        }

        let sent: Vec<LocalHandle> = transactions
            .iter()
            .filter_map(|t| t.local_id.clone())
            .collect();
        let request = SyncInventoryRequest { transactions };

        let response = self.transport.sync_inventory(&request).await?;

        let mut guard = self.store.lock();
        let store = &mut *guard;
        // a bare `{success: true}` confirms the whole batch
        let accepted: Vec<LocalHandle> = if response.success
            && response.accepted.is_empty()
            && response.rejected.is_empty()
        {
            sent.clone()
        } else {
            response
                .accepted
                .into_iter()
                .filter(|handle| sent.contains(handle))
                .collect()
        };

        let mut report = InventorySync::default();
        for handle in &accepted {
            if let Some(transaction) = store.inventory.get_mut(handle) {
                transaction.synced = true;
                transaction.review = None;
                store.queue.acknowledge_key(Table::Inventory, handle.as_str());
                report.accepted += 1;
            }
        }

        for rejected in response.rejected.iter().filter(|r| sent.contains(&r.local_id)) {
            match rejected.kind {
                RejectionKind::Invariant => {
                    tracing::warn!(local_id = %rejected.local_id, reason = %rejected.reason, "inventory transaction flagged");
                    store.flag_transaction(&rejected.local_id, rejected.reason.clone())?;
                    report.flagged += 1;
                }
                RejectionKind::Invalid => {
                    tracing::warn!(local_id = %rejected.local_id, reason = %rejected.reason, "inventory transaction rejected");
                    report.pending += 1;
                }
            }
        }

        rebase(store, &response.server_stock);
        tracing::info!(
            accepted = report.accepted,
            pending = report.pending,
            flagged = report.flagged,
            "inventory sync complete"
        );
        Ok(report)
    }

    /// Ring up a sale offline. Local stock drops immediately.
    pub fn create_order_locally(&self, order: NewOrder) -> Result<LocalHandle> {
        self.store.lock().create_order(order, Timestamp::now())
    }

    /// Record a stock correction and apply it to local stock.
    pub fn record_adjustment(
        &self,
        product_id: ServerId,
        change: StockDelta,
        reason: impl Into<String>,
    ) -> Result<LocalHandle> {
        self.store
            .lock()
            .record_adjustment(product_id, change, reason, Timestamp::now())
    }

    pub fn create_category(&self, title: impl Into<String>, completed: bool) -> Result<EntityRef> {
        self.store
            .lock()
            .create_category(title, completed, Timestamp::now())
    }

    pub fn update_category(
        &self,
        id: &EntityRef,
        title: impl Into<String>,
        completed: bool,
    ) -> Result<()> {
        self.store
            .lock()
            .update_category(id, title, completed, Timestamp::now())
    }

    /// Clear a review flag so the record rejoins the next batch.
    pub fn release_for_retry(&self, handle: &LocalHandle) -> Result<()> {
        self.store.lock().release_for_retry(handle)
    }

    fn check_no_unsynced_orders(&self) -> Result<()> {
        let count = self.store.lock().unsynced_order_count();
        if count > 0 {
            tracing::warn!(count, "start of day refused");
            return Err(Error::Precondition(PreconditionFailure::UnsyncedOrders {
                count,
            }));
        }
        Ok(())
    }
}

/// Count every record kept out of the batch, including orders already
/// waiting for review.
fn held_back_count(store: &LocalStore, withheld: &[idmap::Withheld]) -> usize {
    let in_review = store
        .orders()
        .count(|o| !o.synced && o.review.is_some());
    withheld.len() + in_review
}

/// Flag withheld lines for review. Runs once the pass has an answer, so a
/// failed call leaves them untouched.
fn flag_withheld(store: &mut LocalStore, withheld: &[idmap::Withheld]) {
    for record in withheld {
        tracing::warn!(item = %record.handle, violation = %record.violation, "order item withheld");
        if let Err(e) = store.flag_order_item(&record.handle, record.violation.to_string()) {
            tracing::warn!(item = %record.handle, "could not flag order item: {}", e);
        }
    }
}

/// Apply a push response to the store and classify the outcome.
///
/// Only orders in `sent` can be marked synced. Invariant rejections are
/// flagged; validation rejections stay pending for the next pass.
fn absorb_orders(
    store: &mut LocalStore,
    sent: &[LocalHandle],
    mappings: &[IdentifierMapping],
    rejected: &[RejectedRecord],
    server_stock: &[StockLevel],
    held_back: usize,
) -> SyncOutcome {
    let report = idmap::apply_order_mappings(store, mappings, sent);

    for record in rejected.iter().filter(|r| sent.contains(&r.local_id)) {
        if report.mapped.contains(&record.local_id) {
            continue;
        }
        match record.kind {
            RejectionKind::Invariant => {
                tracing::warn!(order = %record.local_id, reason = %record.reason, "order flagged for review");
                if let Err(e) = store.flag_order(&record.local_id, record.reason.clone()) {
                    tracing::warn!(order = %record.local_id, "could not flag order: {}", e);
                }
            }
            RejectionKind::Invalid => {
                tracing::warn!(order = %record.local_id, reason = %record.reason, "order rejected, will retry");
            }
        }
    }

    rebase(store, server_stock);

    let synced = report.mapped.len();
    let failed = sent.len() - synced + held_back;
    if failed == 0 {
        let removed = store.queue_mut().compact();
        tracing::debug!(removed, "change queue compacted");
        SyncOutcome::Synced { count: synced }
    } else {
        SyncOutcome::Partial { synced, failed }
    }
}

/// Overwrite local stock from the server snapshot, keeping movements the
/// server has not seen.
fn rebase(store: &mut LocalStore, server_stock: &[StockLevel]) -> RebaseReport {
    let pending = store.pending_stock_deltas();
    let report = rebase_on_server(store.products_mut(), server_stock, &pending);
    if !report.unknown.is_empty() {
        tracing::debug!(unknown = ?report.unknown, "stock snapshot has products missing locally");
    }
    report
}
