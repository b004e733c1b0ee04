//! OpenD Client Integration Tests
//!
//! Runs the client, connector and dispatcher against an in-process fake
//! OpenD speaking the framed JSON protocol.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use futu_mcp_gateway::application::services::{
    ChannelState, ConnectionManager, ConnectionSettings, SESSION_LOST, ToolDispatcher,
};
use futu_mcp_gateway::domain::market::FeedType;
use futu_mcp_gateway::domain::payload::ToolResult;
use futu_mcp_gateway::domain::subscription::SubscriptionRegistry;
use futu_mcp_gateway::infrastructure::broadcast::PushHub;
use futu_mcp_gateway::infrastructure::futu::codec::{read_frame, write_frame};
use futu_mcp_gateway::infrastructure::futu::protocol;
use futu_mcp_gateway::infrastructure::futu::{ClientConfig, ClientError, FutuClient, FutuConnector};

// =============================================================================
// Fake OpenD
// =============================================================================

fn ok(s2c: Value) -> Value {
    json!({"retType": 0, "retMsg": "", "errCode": 0, "s2c": s2c})
}

fn reply_for(proto_id: u32) -> Option<Value> {
    match proto_id {
        protocol::INIT_CONNECT => Some(ok(json!({
            "serverVer": 900,
            "loginUserID": 1,
            "connID": 42,
            "keepAliveInterval": 10,
        }))),
        protocol::GET_GLOBAL_STATE => Some(ok(json!({"marketHK": 6, "qotLogined": true}))),
        protocol::QOT_GET_SECURITY_SNAPSHOT => Some(ok(json!({
            "snapshotList": [{
                "basic": {"security": {"market": 1, "code": "00700"}, "curPrice": 320.0},
            }],
        }))),
        protocol::QOT_GET_BASIC_QOT => Some(json!({
            "retType": -1,
            "retMsg": "bad code",
            "errCode": 0,
        })),
        protocol::QOT_SUB | protocol::KEEP_ALIVE => Some(ok(json!({}))),
        // Swallowed: the client must time out.
        _ => None,
    }
}

fn ticker_push() -> Value {
    ok(json!({
        "security": {"market": 1, "code": "00700"},
        "tickerList": [{"price": 320.2, "volume": 100}],
    }))
}

async fn serve_connection(mut stream: TcpStream) {
    while let Ok(frame) = read_frame(&mut stream).await {
        let Some(reply) = reply_for(frame.proto_id) else {
            continue;
        };
        let body = reply.to_string().into_bytes();
        if write_frame(&mut stream, frame.proto_id, frame.serial, &body)
            .await
            .is_err()
        {
            return;
        }
        if frame.proto_id == protocol::QOT_SUB {
            let push = ticker_push().to_string().into_bytes();
            let _ = write_frame(&mut stream, protocol::QOT_UPDATE_TICKER, 0, &push).await;
        }
    }
}

/// Fake OpenD whose live connections can be cut while it keeps accepting.
struct FakeOpenD {
    port: u16,
    sessions: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeOpenD {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sessions: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::default();
        let tracked = Arc::clone(&sessions);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tracked.lock().push(tokio::spawn(serve_connection(stream)));
            }
        });
        Self { port, sessions }
    }

    /// Drop every open connection, as a restarting gateway would.
    fn drop_sessions(&self) {
        for session in self.sessions.lock().drain(..) {
            session.abort();
        }
    }
}

async fn fake_opend() -> u16 {
    FakeOpenD::start().await.port
}

fn config(port: u16) -> ClientConfig {
    ClientConfig {
        port,
        request_timeout: Duration::from_millis(500),
        connect_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
}

fn gateway(port: u16, hub: Arc<PushHub>) -> Arc<ToolDispatcher> {
    let connector = Arc::new(FutuConnector::new(config(port), hub));
    let settings = ConnectionSettings {
        trade_settle: Duration::ZERO,
        teardown_settle: Duration::ZERO,
        ..ConnectionSettings::default()
    };
    Arc::new(ToolDispatcher::new(
        Arc::new(ConnectionManager::new(connector, settings)),
        Arc::new(SubscriptionRegistry::new()),
        100,
    ))
}

// =============================================================================
// Client
// =============================================================================

#[tokio::test]
async fn handshake_records_connection_id() {
    let port = fake_opend().await;

    let client = FutuClient::connect(&config(port), None).await.unwrap();

    assert_eq!(client.conn_id(), Some(42));
    assert!(client.is_open());
    client.close().await;
    assert!(!client.is_open());
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let port = fake_opend().await;
    let client = FutuClient::connect(&config(port), None).await.unwrap();

    let err = client
        .request(protocol::TRD_GET_ORDER_LIST, json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Timeout { proto_id, .. } if proto_id == protocol::TRD_GET_ORDER_LIST));
    client.close().await;
}

#[tokio::test]
async fn requests_after_close_fail_fast() {
    let port = fake_opend().await;
    let client = FutuClient::connect(&config(port), None).await.unwrap();
    client.close().await;

    let err = client
        .request(protocol::GET_GLOBAL_STATE, json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Closed));
}

#[tokio::test]
async fn connect_refused_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = FutuClient::connect(&config(port), None).await.unwrap_err();

    assert!(matches!(err, ClientError::Connect { .. }));
}

// =============================================================================
// End to End
// =============================================================================

#[tokio::test]
async fn snapshot_rows_are_flattened() {
    let port = fake_opend().await;
    let dispatcher = gateway(port, Arc::new(PushHub::default()));

    let result = dispatcher
        .call_named("mcp", "get_market_snapshot", json!({"symbols": ["HK.00700"]}))
        .await
        .unwrap();

    let ToolResult::Success(rows) = result else {
        panic!("expected rows, got {result:?}");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["code"], "HK.00700");
    assert_eq!(rows[0]["cur_price"], 320.0);
    dispatcher.connections().cleanup().await;
}

#[tokio::test]
async fn vendor_rejection_becomes_error_object() {
    let port = fake_opend().await;
    let dispatcher = gateway(port, Arc::new(PushHub::default()));

    let result = dispatcher
        .call_named("mcp", "get_stock_quote", json!({"symbols": ["HK.00700"]}))
        .await
        .unwrap();

    assert_eq!(result.to_value(), json!({"error": "bad code"}));
    dispatcher.connections().cleanup().await;
}

#[tokio::test]
async fn subscription_pushes_reach_the_hub() {
    let port = fake_opend().await;
    let hub = Arc::new(PushHub::default());
    let mut pushes = hub.subscribe_rx();
    let dispatcher = gateway(port, Arc::clone(&hub));

    let result = dispatcher
        .call_named(
            "alice",
            "subscribe",
            json!({"symbols": ["HK.00700"], "sub_types": ["TICKER"]}),
        )
        .await
        .unwrap();
    assert!(!result.is_error());

    let event = timeout(Duration::from_secs(5), pushes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.symbol.to_string(), "HK.00700");
    assert_eq!(event.feed, FeedType::Ticker);
    assert_eq!(event.proto_id, protocol::QOT_UPDATE_TICKER);
    assert_eq!(event.records[0]["price"], 320.2);
    dispatcher.connections().cleanup().await;
}

#[tokio::test]
async fn unreachable_gateway_leaves_quote_absent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let dispatcher = gateway(port, Arc::new(PushHub::default()));

    let result = dispatcher
        .call_named("mcp", "get_global_state", json!({}))
        .await
        .unwrap();

    assert!(result.is_error());
    let snapshot = dispatcher.connections().quote_status().snapshot();
    assert!(snapshot.last_error.is_some());
    assert!(dispatcher.connections().current_quote().await.is_none());
}

#[tokio::test]
async fn dropped_session_is_redialled_on_next_call() {
    let opend = FakeOpenD::start().await;
    let dispatcher = gateway(opend.port, Arc::new(PushHub::default()));
    let connections = Arc::clone(dispatcher.connections());
    connections.init_quote().await.unwrap();

    opend.drop_sessions();
    timeout(Duration::from_secs(5), async {
        while connections.current_quote().await.is_some() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("client never noticed the dropped connection");

    connections.reap_closed();
    let lost = connections.quote_status().snapshot();
    assert_eq!(lost.state, ChannelState::Absent);
    assert_eq!(lost.last_error.as_deref(), Some(SESSION_LOST));

    let result = dispatcher
        .call_named("mcp", "get_global_state", json!({}))
        .await
        .unwrap();

    assert!(!result.is_error(), "got {result:?}");
    let snapshot = connections.quote_status().snapshot();
    assert_eq!(snapshot.state, ChannelState::Ready);
    assert_eq!(snapshot.init_attempts, 2);
    assert_eq!(connections.quote_generation(), 2);
    dispatcher.connections().cleanup().await;
}
