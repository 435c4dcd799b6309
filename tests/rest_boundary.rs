mod common;

use book_engine::book::client::ApiClient;
use book_engine::book::gateway::OrderGateway;
use book_engine::book::snapshot::SnapshotLoader;
use book_engine::{BookError, Side};
use common::{dead_address, ids, order_json};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api(server: &MockServer, token: Option<&str>) -> ApiClient {
    ApiClient::new(
        format!("{}/api", server.uri()),
        token.map(str::to_string),
        Duration::from_secs(2),
    )
    .unwrap()
}

async fn mount_book(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn snapshot_keeps_server_order_on_each_side() {
    let server = MockServer::start().await;
    mount_book(
        &server,
        json!({
            "buy_orders": [order_json(3, Side::Buy, 99.0, 1.0), order_json(1, Side::Buy, 101.0, 1.0)],
            "sell_orders": [order_json(4, Side::Sell, 102.0, 1.0), order_json(2, Side::Sell, 103.0, 1.0)]
        }),
    )
    .await;

    let book = SnapshotLoader::new(api(&server, None)).load().await.unwrap();

    assert_eq!(ids(book.bids()), vec![3, 1]);
    assert_eq!(ids(book.asks()), vec![4, 2]);
    assert_eq!(book.get(3).unwrap().owner, "trader3");
}

#[tokio::test]
async fn snapshot_with_empty_or_missing_lists_is_an_empty_book() {
    for body in [
        json!({ "buy_orders": [], "sell_orders": [] }),
        json!({}),
        json!({ "buy_orders": null, "sell_orders": null }),
    ] {
        let server = MockServer::start().await;
        mount_book(&server, body).await;

        let book = SnapshotLoader::new(api(&server, None)).load().await.unwrap();
        assert!(book.is_empty());
    }
}

#[tokio::test]
async fn snapshot_drops_orders_with_invalid_price_or_amount() {
    let server = MockServer::start().await;
    mount_book(
        &server,
        json!({
            "buy_orders": [order_json(1, Side::Buy, -1.0, 1.0), order_json(2, Side::Buy, 50.0, 1.0)],
            "sell_orders": [order_json(3, Side::Sell, 60.0, -4.0)]
        }),
    )
    .await;

    let book = SnapshotLoader::new(api(&server, None)).load().await.unwrap();

    assert_eq!(ids(book.bids()), vec![2]);
    assert!(book.asks().is_empty());
}

#[tokio::test]
async fn repeated_loads_return_independent_equal_books() {
    let server = MockServer::start().await;
    mount_book(
        &server,
        json!({ "buy_orders": [order_json(1, Side::Buy, 10.0, 1.0)], "sell_orders": [] }),
    )
    .await;

    let loader = SnapshotLoader::new(api(&server, None));
    let first = loader.load().await.unwrap();
    let second = loader.load().await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn undecodable_snapshot_is_a_format_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = SnapshotLoader::new(api(&server, None)).load().await.unwrap_err();
    assert!(matches!(err, BookError::Format(_)), "got {:?}", err);
}

#[tokio::test]
async fn snapshot_server_error_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "Failed to get orders" })))
        .mount(&server)
        .await;

    let err = SnapshotLoader::new(api(&server, None)).load().await.unwrap_err();
    match err {
        BookError::Transport(message) => assert_eq!(message, "Failed to get orders"),
        other => panic!("expected transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let base = format!("http://{}/api", dead_address().await);
    let client = ApiClient::new(base, None, Duration::from_secs(2)).unwrap();

    let err = SnapshotLoader::new(client).load().await.unwrap_err();
    assert!(matches!(err, BookError::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn submit_sends_authorized_request_and_returns_new_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .and(header("authorization", "Bearer tok-1"))
        .and(body_json(json!({ "order_type": "buy", "price": 101.5, "amount": 3.0 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(order_json(42, Side::Buy, 101.5, 3.0)))
        .expect(1)
        .mount(&server)
        .await;

    let id = OrderGateway::new(api(&server, Some("tok-1")))
        .submit(Side::Buy, 101.5, 3.0)
        .await
        .unwrap();

    assert_eq!(id, 42);
}

#[tokio::test]
async fn invalid_submission_never_reaches_the_network() {
    let server = MockServer::start().await;
    let gateway = OrderGateway::new(api(&server, None));

    for (price, amount) in [(0.0, 1.0), (-5.0, 1.0), (10.0, 0.0), (f64::NAN, 1.0), (10.0, f64::INFINITY)] {
        let err = gateway.submit(Side::Sell, price, amount).await.unwrap_err();
        assert!(matches!(err, BookError::Validation(_)), "got {:?}", err);
    }

    let requests = server.received_requests().await.unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn rejected_submission_surfaces_upstream_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "Insufficient balance" })),
        )
        .mount(&server)
        .await;

    let err = OrderGateway::new(api(&server, None))
        .submit(Side::Buy, 10.0, 1.0)
        .await
        .unwrap_err();

    match err {
        BookError::Transport(message) => assert_eq!(message, "Insufficient balance"),
        other => panic!("expected transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn rejected_submission_without_message_uses_generic_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = OrderGateway::new(api(&server, None))
        .submit(Side::Sell, 10.0, 1.0)
        .await
        .unwrap_err();

    match err {
        BookError::Transport(message) => assert_eq!(message, "Failed to create order (HTTP 503)"),
        other => panic!("expected transport error, got {:?}", other),
    }
}

#[tokio::test]
async fn my_orders_lists_callers_orders() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/orders/my"))
        .and(header("authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            order_json(7, Side::Sell, 11.0, 1.0),
            order_json(5, Side::Buy, 9.0, 2.0)
        ])))
        .mount(&server)
        .await;

    let orders = api(&server, Some("tok-2")).fetch_my_orders().await.unwrap();

    assert_eq!(ids(&orders), vec![7, 5]);
    assert_eq!(orders[0].side, Side::Sell);
}
