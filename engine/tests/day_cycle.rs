//! Day-cycle scenarios against an in-memory authoritative replica.

mod common;

use common::{product, sale, MemoryServer};
use parking_lot::Mutex;
use possync_engine::{
    DayCycleController, EntityRef, Error, LocalStore, PreconditionFailure, RecordStore,
    SyncOutcome, Table,
};
use std::sync::Arc;

fn controller(server: &MemoryServer, node: &str) -> DayCycleController<MemoryServer> {
    DayCycleController::new(
        Arc::new(Mutex::new(LocalStore::new(node))),
        server.clone(),
    )
}

async fn started(server: &MemoryServer, node: &str) -> DayCycleController<MemoryServer> {
    let controller = controller(server, node);
    controller.start_of_day().await.unwrap();
    controller
}

#[tokio::test]
async fn end_to_end_order_gets_server_id() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50)]);
    let till = started(&server, "till-1").await;
    server.issue_next(77);

    let handle = till.create_order_locally(sale(1, 2, 50)).unwrap();
    {
        let store = till.store().lock();
        assert_eq!(store.products().get(&1).unwrap().stock, 8);
        assert!(!store.orders().get(&handle).unwrap().synced);
    }

    let outcome = till.end_of_day_sync().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Synced { count: 1 });

    let store = till.store().lock();
    let order = store.orders().get(&handle).unwrap();
    assert_eq!(order.id, EntityRef::Remote(77));
    assert!(order.synced);
    // confirmed, not decremented twice
    assert_eq!(store.products().get(&1).unwrap().stock, 8);
    assert!(store
        .order_items()
        .iter()
        .all(|item| item.order == EntityRef::Remote(77)));
    assert!(store.queue().is_empty());
    assert_eq!(server.stock(1), Some(8));
}

#[tokio::test]
async fn second_end_of_day_is_a_noop() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50)]);
    let till = started(&server, "till-1").await;
    till.create_order_locally(sale(1, 2, 50)).unwrap();

    till.end_of_day_sync().await.unwrap();
    let calls = server.calls();

    let outcome = till.end_of_day_sync().await.unwrap();
    assert_eq!(outcome, SyncOutcome::NothingToSync);
    assert_eq!(server.calls(), calls);
    assert_eq!(server.orders().len(), 1);
    assert_eq!(server.stock(1), Some(8));
}

#[tokio::test]
async fn lost_response_then_retry_creates_no_duplicate() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50)]);
    let till = started(&server, "till-1").await;
    let handle = till.create_order_locally(sale(1, 3, 50)).unwrap();

    server.lose_next_response();
    let err = till.end_of_day_sync().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(!till.store().lock().orders().get(&handle).unwrap().synced);

    let outcome = till.end_of_day_sync().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Synced { count: 1 });
    assert_eq!(server.orders().len(), 1);
    assert_eq!(server.stock(1), Some(7));
    assert_eq!(till.store().lock().products().get(&1).unwrap().stock, 7);
}

#[tokio::test]
async fn start_of_day_refused_while_orders_unsynced() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50)]);
    let till = started(&server, "till-1").await;
    till.create_order_locally(sale(1, 2, 50)).unwrap();
    server.set_stock(1, 100);

    let err = till.start_of_day().await.unwrap_err();
    assert_eq!(
        err,
        Error::Precondition(PreconditionFailure::UnsyncedOrders { count: 1 })
    );

    let store = till.store().lock();
    assert_eq!(store.products().get(&1).unwrap().stock, 8);
    assert_eq!(store.orders().len(), 1);
}

#[tokio::test]
async fn transport_failure_leaves_store_untouched() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50)]);
    let till = started(&server, "till-1").await;
    let handle = till.create_order_locally(sale(1, 2, 50)).unwrap();
    let before = till.store().lock().export_state();

    server.set_offline(true);
    let err = till.end_of_day_sync().await.unwrap_err();
    assert!(matches!(err, Error::Transport { retryable: true, .. }));
    assert_eq!(till.store().lock().export_state(), before);

    server.set_offline(false);
    till.end_of_day_sync().await.unwrap();
    assert!(till.store().lock().orders().get(&handle).unwrap().synced);
}

#[tokio::test]
async fn oversold_order_is_flagged_and_rest_proceeds() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50), product(2, 5, 20)]);
    let till = started(&server, "till-1").await;

    let fine = till.create_order_locally(sale(2, 1, 20)).unwrap();
    let oversold = till.create_order_locally(sale(1, 4, 50)).unwrap();
    // another till sold most of product 1 meanwhile
    server.set_stock(1, 3);

    let outcome = till.end_of_day_sync().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Partial { synced: 1, failed: 1 });
    assert!(!outcome.is_complete());

    {
        let store = till.store().lock();
        assert!(store.orders().get(&fine).unwrap().synced);
        let flagged = store.orders().get(&oversold).unwrap();
        assert!(!flagged.synced);
        assert!(flagged.review.is_some());
        assert_eq!(store.products().get(&2).unwrap().stock, 4);
        assert_eq!(store.queue().pending_count(Table::Orders), 1);
    }
    assert_eq!(server.stock(1), Some(3));

    // flagged orders are skipped until released, and still reported
    let calls = server.calls();
    assert_eq!(
        till.end_of_day_sync().await.unwrap(),
        SyncOutcome::Partial { synced: 0, failed: 1 }
    );
    assert_eq!(server.calls(), calls);

    server.set_stock(1, 20);
    till.release_for_retry(&oversold).unwrap();
    let outcome = till.end_of_day_sync().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Synced { count: 1 });
    assert_eq!(server.stock(1), Some(16));
    assert_eq!(till.store().lock().products().get(&1).unwrap().stock, 16);
}

#[tokio::test]
async fn two_tills_both_land_their_sales() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50)]);
    let a = started(&server, "till-a").await;
    let b = started(&server, "till-b").await;

    a.create_order_locally(sale(1, 3, 50)).unwrap();
    b.create_order_locally(sale(1, 4, 50)).unwrap();

    a.end_of_day_sync().await.unwrap();
    b.end_of_day_sync().await.unwrap();

    assert_eq!(server.stock(1), Some(3));
    assert_eq!(b.store().lock().products().get(&1).unwrap().stock, 3);
    assert_eq!(server.orders().len(), 2);
}

#[tokio::test]
async fn sync_orders_remap_flow() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50)]);
    let till = started(&server, "till-1").await;
    let first = till.create_order_locally(sale(1, 1, 50)).unwrap();
    let second = till.create_order_locally(sale(1, 2, 50)).unwrap();

    let outcome = till.sync_orders().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Synced { count: 2 });

    let store = till.store().lock();
    for handle in [&first, &second] {
        let order = store.orders().get(handle).unwrap();
        assert!(order.synced);
        assert!(!order.id.is_local());
    }
    assert!(possync_engine::idmap::dangling_references(&store).is_empty());
    assert_eq!(server.stock(1), Some(7));
}

#[tokio::test]
async fn start_of_day_after_sync_resets_working_set() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50)]);
    let till = started(&server, "till-1").await;
    till.create_order_locally(sale(1, 2, 50)).unwrap();
    till.end_of_day_sync().await.unwrap();

    server.set_stock(1, 40);
    let day = till.start_of_day().await.unwrap();
    assert_eq!(day.products, 1);

    let store = till.store().lock();
    assert!(store.orders().is_empty());
    assert!(store.order_items().is_empty());
    assert_eq!(store.products().get(&1).unwrap().stock, 40);
}

#[tokio::test]
async fn concurrent_passes_are_serialized() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50)]);
    let till = Arc::new(started(&server, "till-1").await);
    till.create_order_locally(sale(1, 2, 50)).unwrap();

    let pushes: Vec<_> = (0..4)
        .map(|_| {
            let till = Arc::clone(&till);
            tokio::spawn(async move { till.end_of_day_sync().await })
        })
        .collect();

    let mut synced = 0;
    for push in pushes {
        match push.await.unwrap().unwrap() {
            SyncOutcome::Synced { count } => synced += count,
            SyncOutcome::NothingToSync => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(synced, 1);
    assert_eq!(server.orders().len(), 1);
    assert_eq!(server.stock(1), Some(8));
}

#[tokio::test]
async fn orphan_lines_are_flagged_only_after_an_answer() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50)]);
    let till = started(&server, "till-1").await;
    let kept = till.create_order_locally(sale(1, 1, 50)).unwrap();
    let lost = till.create_order_locally(sale(1, 1, 50)).unwrap();

    // drop the parent of one line to leave it orphaned
    {
        let mut store = till.store().lock();
        let mut snapshot = store.export_state();
        snapshot.orders.retain(|o| o.handle != lost);
        store.import_state(snapshot);
    }
    let before = till.store().lock().export_state();

    server.set_offline(true);
    till.end_of_day_sync().await.unwrap_err();
    assert_eq!(till.store().lock().export_state(), before);

    server.set_offline(false);
    let outcome = till.end_of_day_sync().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Partial { synced: 1, failed: 1 });

    let store = till.store().lock();
    assert!(store.orders().get(&kept).unwrap().synced);
    let orphans = store.order_items().scan(|i| i.order.is_local_handle(&lost));
    assert_eq!(orphans.len(), 1);
    assert!(orphans[0].review.is_some());
}

#[tokio::test]
async fn sale_of_withdrawn_product_is_flagged_not_stuck() {
    let server = MemoryServer::with_products(vec![product(1, 10, 50), product(2, 5, 20)]);
    let till = started(&server, "till-1").await;

    let withdrawn = till.create_order_locally(sale(2, 1, 20)).unwrap();
    server.remove_product(2);

    let outcome = till.end_of_day_sync().await.unwrap();
    assert_eq!(outcome, SyncOutcome::Partial { synced: 0, failed: 1 });
    let store = till.store().lock();
    assert!(store.orders().get(&withdrawn).unwrap().review.is_some());
}
