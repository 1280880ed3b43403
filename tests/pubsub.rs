//! Topic publishing: fan-out, capture params, and retained messages.

mod common;

use common::{connect, descriptor, start_broker, RECV_TIMEOUT};
use mullion::connector::PublishOptions;
use mullion::Error;
use tokio::time::timeout;

#[tokio::test]
async fn each_matching_subscription_receives_one_copy() {
    let handle = start_broker(vec![descriptor("shop")]);
    let connector = connect(&handle, "shop").await;

    let mut first = connector.subscribe("order/:id").await.unwrap();
    let mut second = connector.subscribe("order/:id").await.unwrap();
    let mut third = connector.subscribe("order/:id").await.unwrap();

    connector.publish("order/42", "created").await.unwrap();
    for subscription in [&mut first, &mut second, &mut third] {
        let message = timeout(RECV_TIMEOUT, subscription.recv())
            .await
            .expect("copy arrives")
            .unwrap();
        assert_eq!(message.body_bytes(), b"created");
        assert_eq!(message.params["id"], "42");
    }

    // Dropping one subscription leaves its siblings untouched.
    drop(second);
    connector.publish("order/43", "paid").await.unwrap();
    for subscription in [&mut first, &mut third] {
        let message = timeout(RECV_TIMEOUT, subscription.recv())
            .await
            .expect("copy arrives")
            .unwrap();
        assert_eq!(message.params["id"], "43");
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn messages_cross_client_boundaries_only_through_the_broker() {
    let handle = start_broker(vec![descriptor("shop"), descriptor("billing")]);
    let shop = connect(&handle, "shop").await;
    let billing = connect(&handle, "billing").await;

    let mut invoices = billing.subscribe("invoice/:id/created").await.unwrap();
    shop.publish("invoice/7/created", "{\"total\":12}")
        .await
        .unwrap();

    let message = timeout(RECV_TIMEOUT, invoices.recv())
        .await
        .expect("delivery")
        .unwrap();
    assert_eq!(message.params["id"], "7");
    assert_eq!(
        message.headers["app-symbolic-name"].as_str(),
        Some("shop")
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn reserved_headers_cannot_be_spoofed() {
    let handle = start_broker(vec![descriptor("shop"), descriptor("billing")]);
    let shop = connect(&handle, "shop").await;
    let billing = connect(&handle, "billing").await;

    let mut seen = billing.subscribe("audit").await.unwrap();
    let options = PublishOptions::new()
        .with_header("app-symbolic-name", "treasury")
        .with_header("client-id", "forged")
        .with_header("note", "kept");
    shop.publish_with("audit", "entry", options).await.unwrap();

    let message = timeout(RECV_TIMEOUT, seen.recv())
        .await
        .expect("delivery")
        .unwrap();
    assert_eq!(
        message.headers["app-symbolic-name"].as_str(),
        Some("shop")
    );
    assert_ne!(message.headers["client-id"].as_str(), Some("forged"));
    assert_eq!(message.headers["note"].as_str(), Some("kept"));
    assert!(message.timestamp().is_some());
    handle.shutdown().await;
}

#[tokio::test]
async fn publishing_to_an_invalid_topic_is_rejected() {
    let handle = start_broker(vec![descriptor("shop")]);
    let connector = connect(&handle, "shop").await;

    let error = connector.publish("order/:id", "x").await.unwrap_err();
    assert!(matches!(error, Error::Rejected(_)));
    assert!(error.to_string().contains("capture"));
    handle.shutdown().await;
}

#[tokio::test]
async fn publishing_without_subscribers_succeeds() {
    let handle = start_broker(vec![descriptor("shop")]);
    let connector = connect(&handle, "shop").await;
    connector.publish("order/42", "created").await.unwrap();
    handle.shutdown().await;
}

#[tokio::test]
async fn retained_message_is_replayed_to_late_subscribers_only() {
    let handle = start_broker(vec![descriptor("shop")]);
    let connector = connect(&handle, "shop").await;

    let mut early = connector.subscribe("stock/widgets").await.unwrap();
    connector
        .publish_with("stock/widgets", "41", PublishOptions::new().with_retain(true))
        .await
        .unwrap();
    let live = timeout(RECV_TIMEOUT, early.recv())
        .await
        .expect("live delivery")
        .unwrap();
    assert_eq!(live.body_bytes(), b"41");

    let mut late = connector.subscribe("stock/widgets").await.unwrap();
    let replay = timeout(RECV_TIMEOUT, late.recv())
        .await
        .expect("replay to the new subscription")
        .unwrap();
    assert_eq!(replay.body_bytes(), b"41");

    // The early subscription saw the live copy once and nothing since.
    connector.publish("stock/noise", "x").await.unwrap();
    assert!(timeout(std::time::Duration::from_millis(100), early.recv())
        .await
        .is_err());
    handle.shutdown().await;
}

#[tokio::test]
async fn retained_publish_replaces_the_previous_entry() {
    let handle = start_broker(vec![descriptor("shop")]);
    let connector = connect(&handle, "shop").await;

    let retain = || PublishOptions::new().with_retain(true);
    connector
        .publish_with("stock/widgets", "41", retain())
        .await
        .unwrap();
    connector
        .publish_with("stock/widgets", "42", retain())
        .await
        .unwrap();

    let mut late = connector.subscribe("stock/widgets").await.unwrap();
    let replay = timeout(RECV_TIMEOUT, late.recv())
        .await
        .expect("replay")
        .unwrap();
    assert_eq!(replay.body_bytes(), b"42");
    handle.shutdown().await;
}

#[tokio::test]
async fn bodyless_retained_publish_deletes_the_entry() {
    let handle = start_broker(vec![descriptor("shop")]);
    let connector = connect(&handle, "shop").await;

    connector
        .publish_with("stock/widgets", "41", PublishOptions::new().with_retain(true))
        .await
        .unwrap();
    connector.delete_retained("stock/widgets").await.unwrap();

    let mut late = connector.subscribe("stock/widgets").await.unwrap();
    assert!(timeout(std::time::Duration::from_millis(100), late.recv())
        .await
        .is_err());
    handle.shutdown().await;
}

#[tokio::test]
async fn wildcard_subscription_replays_the_freshest_matching_entry() {
    let handle = start_broker(vec![descriptor("shop")]);
    let connector = connect(&handle, "shop").await;

    let retain = || PublishOptions::new().with_retain(true);
    connector
        .publish_with("a/b/temperature", "old", retain())
        .await
        .unwrap();
    connector
        .publish_with("a/b/temperature", "new", retain())
        .await
        .unwrap();
    connector
        .publish_with("a/c/humidity", "60%", retain())
        .await
        .unwrap();

    let mut narrow = connector.subscribe("a/b/:measurement").await.unwrap();
    let replay = timeout(RECV_TIMEOUT, narrow.recv())
        .await
        .expect("replay")
        .unwrap();
    assert_eq!(replay.topic, "a/b/temperature");
    assert_eq!(replay.body_bytes(), b"new");
    assert_eq!(replay.params["measurement"], "temperature");

    // Across all three entries the humidity publish is the most recent.
    let mut wide = connector.subscribe(":x/:y/:z").await.unwrap();
    let replay = timeout(RECV_TIMEOUT, wide.recv())
        .await
        .expect("replay")
        .unwrap();
    assert_eq!(replay.topic, "a/c/humidity");
    handle.shutdown().await;
}
