use crate::support::{order_json, wait_for_state, KitchenServer, WAIT};
use bistro_core::error::FeedError;
use bistro_core::feed::{FeedStatus, Lane, OrderFeed};
use bistro_core::order::{OrderStatus, RecordId};
use bistro_core::push::LiveOrderFeed;
use serde_json::json;

fn ids(orders: &[bistro_core::order::Order]) -> Vec<String> {
    orders.iter().map(|order| order.id.to_string()).collect()
}

async fn wait_for_status(feed: &OrderFeed, predicate: impl FnMut(&FeedStatus) -> bool) {
    let mut rx = feed.watch_status();
    tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("status within timeout")
        .expect("status sender alive");
}

#[tokio::test]
async fn reconciles_snapshot_and_updates_from_the_socket() {
    let mut server = KitchenServer::start().await.expect("server");
    let mut live = LiveOrderFeed::new(server.url.clone(), OrderFeed::new());
    live.connect(Some("a1")).await.expect("connect");
    let peer = server.peer().await;
    assert_eq!(peer.authorization.as_deref(), Some("Bearer a1"));
    assert_eq!(live.feed().status(), FeedStatus::Live);

    peer.send_event(
        "orders:snapshot",
        json!([
            order_json(1, "PENDING"),
            order_json(2, "PREPARING"),
            order_json(3, "READY")
        ]),
    );
    let state = wait_for_state(live.feed(), |state| !state.is_empty()).await;
    assert_eq!(ids(state.open_orders()), ["1"]);
    assert_eq!(ids(state.preparing_orders()), ["2"]);

    peer.send_event("order:updated", order_json(1, "PREPARING"));
    let state = wait_for_state(live.feed(), |state| state.open_orders().is_empty()).await;
    assert_eq!(ids(state.preparing_orders()), ["1", "2"]);

    peer.send_event("order:updated", order_json(2, "READY"));
    let state = wait_for_state(live.feed(), |state| state.preparing_orders().len() == 1).await;
    assert_eq!(ids(state.preparing_orders()), ["1"]);

    peer.send_event("order:created", order_json(4, "PENDING"));
    let state = wait_for_state(live.feed(), |state| !state.open_orders().is_empty()).await;
    assert_eq!(ids(state.open_orders()), ["4"]);
}

#[tokio::test]
async fn malformed_frames_are_ignored() {
    let mut server = KitchenServer::start().await.expect("server");
    let mut live = LiveOrderFeed::new(server.url.clone(), OrderFeed::new());
    live.connect(Some("a1")).await.expect("connect");
    let peer = server.peer().await;

    peer.send_event("orders:snapshot", json!([order_json(1, "PENDING")]));
    wait_for_state(live.feed(), |state| state.open_orders().len() == 1).await;

    peer.send_raw("{not json");
    peer.send_event("order:updated", json!({ "id": 1 }));
    peer.send_event("orders:purged", json!([]));
    peer.send_event("order:created", order_json(2, "PENDING"));

    let state = wait_for_state(live.feed(), |state| state.open_orders().len() == 2).await;
    assert_eq!(ids(state.open_orders()), ["2", "1"]);
    assert_eq!(live.feed().status(), FeedStatus::Live);
}

#[tokio::test]
async fn server_close_surfaces_a_failure() {
    let mut server = KitchenServer::start().await.expect("server");
    let mut live = LiveOrderFeed::new(server.url.clone(), OrderFeed::new());
    live.connect(Some("a1")).await.expect("connect");
    let peer = server.peer().await;

    peer.close();
    wait_for_status(live.feed(), |status| matches!(status, FeedStatus::Failed(_))).await;
}

#[tokio::test]
async fn lost_connection_refuses_further_commands() {
    let mut server = KitchenServer::start().await.expect("server");
    let mut live = LiveOrderFeed::new(server.url.clone(), OrderFeed::new());
    live.connect(Some("a1")).await.expect("connect");
    let peer = server.peer().await;

    peer.close();
    wait_for_status(live.feed(), |status| matches!(status, FeedStatus::Failed(_))).await;

    assert!(!live.is_connected());
    assert!(matches!(
        live.request_status_change(RecordId::from(1), OrderStatus::Preparing),
        Err(FeedError::NotConnected)
    ));
    assert!(matches!(live.flush().await, Err(FeedError::NotConnected)));
}

#[tokio::test]
async fn reconnect_leaves_the_new_subscription_in_charge() {
    let mut server = KitchenServer::start().await.expect("server");
    let mut live = LiveOrderFeed::new(server.url.clone(), OrderFeed::new());
    live.connect(Some("a1")).await.expect("connect");
    let mut first = server.peer().await;

    live.connect(Some("a2")).await.expect("reconnect");
    let second = server.peer().await;
    assert_eq!(second.authorization.as_deref(), Some("Bearer a2"));
    first.wait_closed().await;

    second.send_event("orders:snapshot", json!([order_json(5, "PENDING")]));
    let state = wait_for_state(live.feed(), |state| !state.is_empty()).await;
    assert_eq!(ids(state.open_orders()), ["5"]);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(live.feed().status(), FeedStatus::Live);
    assert!(live.is_connected());
}

#[tokio::test]
async fn rejected_handshake_is_a_connection_error() {
    let server = KitchenServer::rejecting().await.expect("server");
    let mut live = LiveOrderFeed::new(server.url.clone(), OrderFeed::new());

    let err = live.connect(Some("expired")).await.unwrap_err();
    assert!(matches!(err, FeedError::Connect(_)));
    assert!(matches!(live.feed().status(), FeedStatus::Failed(_)));
    assert!(!live.is_connected());
}

#[tokio::test]
async fn status_change_is_sent_without_touching_local_columns() {
    let mut server = KitchenServer::start().await.expect("server");
    let mut live = LiveOrderFeed::new(server.url.clone(), OrderFeed::new());
    live.connect(Some("a1")).await.expect("connect");
    let mut peer = server.peer().await;

    peer.send_event("orders:snapshot", json!([order_json(1, "PENDING")]));
    wait_for_state(live.feed(), |state| !state.is_empty()).await;

    live.request_status_change(RecordId::from(1), OrderStatus::Preparing)
        .expect("command queued");
    live.flush().await.expect("command written");
    let command = peer.next_command().await;
    assert_eq!(
        command,
        json!({ "event": "order:status", "data": { "orderId": "1", "status": "PREPARING" } })
    );
    assert_eq!(live.feed().current().lane_of(&RecordId::from(1)), Lane::Open);

    peer.send_event("order:updated", order_json(1, "PREPARING"));
    let state = wait_for_state(live.feed(), |state| {
        state.lane_of(&RecordId::from(1)) == Lane::Preparing
    })
    .await;
    assert!(state.open_orders().is_empty());
}

#[tokio::test]
async fn disconnect_releases_the_subscription() {
    let mut server = KitchenServer::start().await.expect("server");
    let mut live = LiveOrderFeed::new(server.url.clone(), OrderFeed::new());
    live.connect(Some("a1")).await.expect("connect");
    let _peer = server.peer().await;

    live.disconnect();
    assert!(!live.is_connected());
    assert_eq!(live.feed().status(), FeedStatus::Closed);
    assert!(matches!(
        live.request_status_change(RecordId::from(1), OrderStatus::Ready),
        Err(FeedError::NotConnected)
    ));
}
