//! WebSocket Push Feed Integration Tests
//!
//! Serves the push-feed router on an ephemeral port and talks to it with a
//! real WebSocket client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use common::{StubQuote, dispatcher, record};
use futu_mcp_gateway::application::services::ToolDispatcher;
use futu_mcp_gateway::domain::market::{FeedType, Symbol};
use futu_mcp_gateway::infrastructure::broadcast::{PushEvent, PushHub};
use futu_mcp_gateway::infrastructure::push::{PushFeedState, handle_message, router};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: SocketAddr,
    dispatcher: Arc<ToolDispatcher>,
    quote: Arc<StubQuote>,
    hub: Arc<PushHub>,
    state: Arc<PushFeedState>,
    cancel: CancellationToken,
}

async fn start() -> Harness {
    let quote = Arc::new(StubQuote::default());
    let dispatcher = dispatcher(Arc::clone(&quote), None);
    let hub = Arc::new(PushHub::new(64));
    let cancel = CancellationToken::new();
    let state = Arc::new(PushFeedState::new(
        Arc::clone(&dispatcher),
        Arc::clone(&hub),
        cancel.clone(),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = cancel.clone();
    let served = Arc::clone(&state);
    tokio::spawn(async move {
        axum::serve(listener, router(served))
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .unwrap();
    });

    Harness {
        addr,
        dispatcher,
        quote,
        hub,
        state,
        cancel,
    }
}

async fn connect(addr: SocketAddr, client_id: &str) -> Client {
    let (socket, _) = connect_async(format!("ws://{addr}/ws/{client_id}"))
        .await
        .unwrap();
    socket
}

async fn call(socket: &mut Client, request: Value) -> Value {
    socket
        .send(Message::Text(request.to_string().into()))
        .await
        .unwrap();
    next_json(socket).await
}

async fn next_json(socket: &mut Client) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition never held");
}

fn sym(s: &str) -> Symbol {
    s.parse().unwrap()
}

// =============================================================================
// Request Handling
// =============================================================================

#[tokio::test]
async fn missing_id_is_rejected_without_state_change() {
    let harness = start().await;

    let reply = handle_message(
        &harness.dispatcher,
        "alice",
        r#"{"method":"subscribe","params":{"symbols":["HK.00700"],"sub_types":["QUOTE"]}}"#,
    )
    .await;

    assert_eq!(reply["error"]["code"], -32000);
    assert_eq!(reply["id"], Value::Null);
    assert!(harness.dispatcher.subscriptions("alice").is_empty());
    assert!(harness.quote.subscribed.lock().is_empty());
    harness.cancel.cancel();
}

#[tokio::test]
async fn malformed_and_unknown_requests_use_server_error_code() {
    let harness = start().await;

    let garbage = handle_message(&harness.dispatcher, "alice", "{not json").await;
    assert_eq!(garbage["error"]["code"], -32000);

    let unknown = handle_message(
        &harness.dispatcher,
        "alice",
        r#"{"id":3,"method":"place_order","params":{}}"#,
    )
    .await;
    assert_eq!(unknown["id"], 3);
    assert_eq!(unknown["error"]["code"], -32000);
    assert_eq!(unknown["error"]["message"], "Unknown method: place_order");

    let bad_params = handle_message(
        &harness.dispatcher,
        "alice",
        r#"{"id":4,"method":"subscribe","params":{"symbols":["HK.00700"],"sub_types":["NOPE"]}}"#,
    )
    .await;
    assert_eq!(bad_params["error"]["code"], -32000);
    assert!(harness.dispatcher.subscriptions("alice").is_empty());
    harness.cancel.cancel();
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn subscribe_then_get_subscription_over_socket() {
    let harness = start().await;
    let mut socket = connect(harness.addr, "alice").await;

    let reply = call(
        &mut socket,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "subscribe",
            "params": {"symbols": ["HK.00700"], "sub_types": ["QUOTE", "TICKER"]},
        }),
    )
    .await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"], json!([{"status": "success"}]));

    let reply = call(&mut socket, json!({"id": 2, "method": "get_subscription"})).await;
    assert_eq!(reply["result"], json!({"HK.00700": ["QUOTE", "TICKER"]}));
    harness.cancel.cancel();
}

#[tokio::test]
async fn pushes_reach_only_subscribed_clients() {
    let harness = start().await;
    let mut socket = connect(harness.addr, "alice").await;
    call(
        &mut socket,
        json!({
            "id": 1,
            "method": "subscribe",
            "params": {"symbols": ["HK.00700"], "sub_types": ["TICKER"]},
        }),
    )
    .await;

    let _ = harness.hub.send(PushEvent {
        symbol: sym("HK.09988"),
        feed: FeedType::Ticker,
        proto_id: 3011,
        records: vec![record(json!({"price": 80.0}))],
    });
    let _ = harness.hub.send(PushEvent {
        symbol: sym("HK.00700"),
        feed: FeedType::Ticker,
        proto_id: 3011,
        records: vec![record(json!({"price": 320.0}))],
    });

    let push = next_json(&mut socket).await;
    assert_eq!(push["method"], "push");
    assert_eq!(push["params"]["symbol"], "HK.00700");
    assert_eq!(push["params"]["sub_type"], "TICKER");
    assert_eq!(push["params"]["data"], json!([{"price": 320.0}]));
    harness.cancel.cancel();
}

#[tokio::test]
async fn disconnect_releases_subscriptions() {
    let harness = start().await;
    let mut socket = connect(harness.addr, "alice").await;
    call(
        &mut socket,
        json!({
            "id": 1,
            "method": "subscribe",
            "params": {"symbols": ["US.AAPL"], "sub_types": ["QUOTE"]},
        }),
    )
    .await;
    assert_eq!(harness.dispatcher.registry().stats().pair_count, 1);

    socket.close(None).await.unwrap();

    let registry = Arc::clone(harness.dispatcher.registry());
    wait_until(|| registry.stats().client_count == 0).await;
    let quote = Arc::clone(&harness.quote);
    wait_until(|| quote.unsubscribed.lock().len() == 1).await;
    assert_eq!(
        *harness.quote.unsubscribed.lock(),
        vec![(sym("US.AAPL"), FeedType::Quote)]
    );
    harness.cancel.cancel();
}

#[tokio::test]
async fn second_socket_for_connected_id_is_refused() {
    let harness = start().await;
    let mut first = connect(harness.addr, "alice").await;
    call(
        &mut first,
        json!({
            "id": 1,
            "method": "subscribe",
            "params": {"symbols": ["HK.00700"], "sub_types": ["QUOTE"]},
        }),
    )
    .await;

    let err = connect_async(format!("ws://{}/ws/alice", harness.addr))
        .await
        .unwrap_err();
    let WsError::Http(response) = err else {
        panic!("expected an HTTP refusal, got {err:?}");
    };
    assert_eq!(response.status().as_u16(), 409);

    // The refused attempt left the first session's subscriptions alone.
    assert!(harness.dispatcher.registry().is_subscribed(
        "alice",
        &sym("HK.00700"),
        FeedType::Quote
    ));
    assert!(harness.quote.unsubscribed.lock().is_empty());

    first.close(None).await.unwrap();
    let state = Arc::clone(&harness.state);
    wait_until(|| !state.is_connected("alice")).await;

    let mut again = connect(harness.addr, "alice").await;
    let reply = call(&mut again, json!({"id": 2, "method": "get_subscription"})).await;
    assert_eq!(reply["result"], json!({}));
    harness.cancel.cancel();
}
