//! Destination pool behaviour: queued peeks, lingering leases, convergence

mod common;

use common::{addresses, init_tracing, mock_pool};
use futures::future::{pending, FutureExt};
use proptest::prelude::*;
use rpc_network::test_utils::MockBusConnector;
use rpc_network::Bus;
use std::collections::BTreeSet;
use tokio::sync::oneshot;
use tokio_test::{assert_pending, assert_ready};

#[tokio::test]
async fn queued_peek_resolves_when_destination_added() {
    init_tracing();
    let connector = MockBusConnector::new();
    let pool = mock_pool(&connector, "sas");

    let mut first = tokio_test::task::spawn(pool.peek_client(pending::<()>()));
    assert_pending!(first.poll());

    pool.update_clients(addresses(&["h:1"])).await.unwrap();
    let destination = assert_ready!(first.poll()).unwrap().unwrap();
    assert_eq!(destination.address(), "h:1");

    // With a live destination the peek never queues
    let second = pool
        .peek_client(pending::<()>())
        .now_or_never()
        .expect("peek should resolve synchronously")
        .unwrap()
        .unwrap();
    assert_eq!(second.address(), "h:1");
    assert_eq!(second.ref_count(), 2);
}

#[tokio::test]
async fn held_destination_survives_empty_update() {
    let connector = MockBusConnector::new();
    let pool = mock_pool(&connector, "sas");
    pool.update_clients(addresses(&["h:1"])).await.unwrap();

    let held = pool.try_peek_client().unwrap();
    assert_eq!(held.ref_count(), 1);

    pool.update_clients(Vec::new()).await.unwrap();
    let bus = connector.bus("h:1").unwrap();
    assert!(!bus.is_closed());
    assert!(held.is_removed());
    assert_eq!(pool.live_count(), 0);

    drop(held);
    assert!(bus.is_closed());
}

#[tokio::test]
async fn unreferenced_destination_closes_immediately() {
    let connector = MockBusConnector::new();
    let pool = mock_pool(&connector, "sas");
    pool.update_clients(addresses(&["h:1", "h:2"])).await.unwrap();

    pool.update_clients(addresses(&["h:2"])).await.unwrap();
    assert!(connector.bus("h:1").unwrap().is_closed());
    assert!(!connector.bus("h:2").unwrap().is_closed());
}

#[tokio::test]
async fn lingering_destination_can_still_serve_requests() {
    let connector = MockBusConnector::new();
    connector.set_responder(|_, _| Some(rpc_network::test_utils::MockReply::body(&b"ok"[..])));
    let pool = mock_pool(&connector, "sas");
    pool.update_clients(addresses(&["h:1"])).await.unwrap();
    let held = pool.try_peek_client().unwrap();

    pool.update_clients(addresses(&["h:2"])).await.unwrap();
    let request = rpc_network::RpcRequest::new("ApiService", "GetNode", &b"//tmp"[..]);
    let response = held.client().send(&request).await.unwrap();
    assert_eq!(&response.body[..], b"ok");
}

#[tokio::test]
async fn cancelled_peek_opens_no_connection() {
    let connector = MockBusConnector::new();
    let pool = mock_pool(&connector, "sas");

    let (cancel, cancelled) = oneshot::channel::<()>();
    let mut peek = tokio_test::task::spawn(pool.peek_client(async move {
        let _ = cancelled.await;
    }));
    assert_pending!(peek.poll());
    assert_eq!(pool.waiting_peeks(), 1);

    cancel.send(()).unwrap();
    let result = assert_ready!(peek.poll()).unwrap();
    assert!(result.is_none());
    assert_eq!(pool.waiting_peeks(), 0);
    assert!(connector.opened().is_empty());

    // A later update hands nothing to the abandoned peek
    pool.update_clients(addresses(&["h:1"])).await.unwrap();
    assert_eq!(connector.opened(), addresses(&["h:1"]));
    assert_eq!(pool.destination("h:1").unwrap().ref_count(), 1);
}

#[tokio::test]
async fn dropped_peek_future_leaves_no_waiter() {
    let connector = MockBusConnector::new();
    let pool = mock_pool(&connector, "sas");

    let mut peek = tokio_test::task::spawn(pool.peek_client(pending::<()>()));
    assert_pending!(peek.poll());
    drop(peek);
    assert_eq!(pool.waiting_peeks(), 0);
}

#[tokio::test]
async fn destination_invisible_until_connected() {
    let connector = MockBusConnector::new();
    connector.hold_address("h:1");
    let pool = mock_pool(&connector, "sas");

    let updater = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.update_clients(addresses(&["h:1"])).await })
    };

    while connector.opened().is_empty() {
        tokio::task::yield_now().await;
    }
    assert!(pool.try_peek_client().is_none());
    assert_eq!(pool.live_count(), 0);

    connector.bus("h:1").unwrap().complete_connect();
    updater.await.unwrap().unwrap();
    assert_eq!(pool.try_peek_client().unwrap().address(), "h:1");
}

fn address_lists() -> impl Strategy<Value = Vec<Vec<String>>> {
    let universe = vec!["h:1", "h:2", "h:3", "h:4", "h:5"];
    prop::collection::vec(
        prop::collection::vec(prop::sample::select(universe), 0..6)
            .prop_map(|list| list.into_iter().map(String::from).collect::<Vec<_>>()),
        1..12,
    )
}

proptest! {
    #[test]
    fn live_set_tracks_latest_update(updates in address_lists()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let connector = MockBusConnector::new();
            let pool = mock_pool(&connector, "sas");

            for update in updates {
                pool.update_clients(update.clone()).await.unwrap();
                let expected: Vec<String> = update.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
                assert_eq!(pool.addresses(), expected);

                let open = connector.buses().iter().filter(|bus| !bus.is_closed()).count();
                assert_eq!(open, pool.live_count());
            }
        });
    }
}
