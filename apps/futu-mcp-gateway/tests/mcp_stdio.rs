//! MCP Stdio Integration Tests
//!
//! Feeds newline-delimited JSON-RPC through an in-memory pipe.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use common::{StubQuote, dispatcher, record};
use futu_mcp_gateway::domain::payload::{VendorFailure, VendorPayload};
use futu_mcp_gateway::infrastructure::mcp::McpServer;

fn server(quote: Arc<StubQuote>) -> McpServer {
    McpServer::new(
        dispatcher(quote, None),
        "9.9.9".to_string(),
        CancellationToken::new(),
    )
}

async fn exchange(server: &McpServer, lines: &[Value]) -> Vec<Value> {
    let mut input = String::new();
    for line in lines {
        input.push_str(&line.to_string());
        input.push('\n');
    }
    let (mut client, served) = tokio::io::duplex(64 * 1024);
    let mut output = Vec::new();

    client.write_all(input.as_bytes()).await.unwrap();
    client.shutdown().await.unwrap();
    server
        .run(BufReader::new(served), &mut output)
        .await
        .unwrap();

    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn initialize_handshake_and_listing() {
    let server = server(Arc::new(StubQuote::default()));

    let replies = exchange(
        &server,
        &[
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
                   "params": {"protocolVersion": "2025-03-26", "capabilities": {}}}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            json!({"jsonrpc": "2.0", "id": 3, "method": "prompts/list"}),
        ],
    )
    .await;

    assert_eq!(replies.len(), 3, "notifications get no reply");
    assert_eq!(replies[0]["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(replies[0]["result"]["serverInfo"]["version"], "9.9.9");

    let tools = replies[1]["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"get_history_kline"));
    assert!(names.contains(&"subscribe"));
    assert!(!names.contains(&"place_order"));

    assert_eq!(replies[2]["result"]["prompts"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn tool_call_wraps_result_as_text() {
    let quote = StubQuote::replying(Ok(VendorPayload::Records(vec![record(
        json!({"code": "HK.00700", "last_price": 320.2}),
    )])));
    let server = server(quote);

    let replies = exchange(
        &server,
        &[json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {"name": "get_stock_quote", "arguments": {"symbols": ["HK.00700"]}},
        })],
    )
    .await;

    let result = &replies[0]["result"];
    assert_eq!(result["isError"], false);
    let text = result["content"][0]["text"].as_str().unwrap();
    let payload: Value = serde_json::from_str(text).unwrap();
    assert_eq!(payload, json!([{"code": "HK.00700", "last_price": 320.2}]));
}

#[tokio::test]
async fn vendor_failure_sets_is_error() {
    let server = server(StubQuote::replying(Err(VendorFailure::new("bad code"))));

    let reply = server
        .handle_line(
            &json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "get_global_state", "arguments": {}},
            })
            .to_string(),
        )
        .await
        .unwrap();

    assert_eq!(reply["result"]["isError"], true);
    assert_eq!(reply["result"]["content"][0]["text"], r#"{"error":"bad code"}"#);
}

#[tokio::test]
async fn protocol_errors_use_standard_codes() {
    let server = server(Arc::new(StubQuote::default()));

    let parse = server.handle_line("{oops").await.unwrap();
    assert_eq!(parse["error"]["code"], -32700);
    assert_eq!(parse["id"], Value::Null);

    let unknown = server
        .handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"sampling/createMessage"}"#)
        .await
        .unwrap();
    assert_eq!(unknown["error"]["code"], -32601);

    let bad_tool = server
        .handle_line(
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"nope","arguments":{}}}"#,
        )
        .await
        .unwrap();
    assert_eq!(bad_tool["error"]["code"], -32602);
    assert_eq!(bad_tool["error"]["message"], "Unknown method: nope");
}

#[tokio::test]
async fn resource_read_serves_snapshot() {
    let quote = StubQuote::replying(Ok(VendorPayload::Records(vec![record(
        json!({"code": "US.AAPL"}),
    )])));
    let server = server(Arc::clone(&quote));

    let reply = server
        .handle_line(
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"market://US.AAPL"}}"#,
        )
        .await
        .unwrap();

    let content = &reply["result"]["contents"][0];
    assert_eq!(content["uri"], "market://US.AAPL");
    assert_eq!(content["mimeType"], "application/json");
    assert_eq!(content["text"], r#"[{"code":"US.AAPL"}]"#);
    assert_eq!(quote.queries.lock().len(), 2, "probe plus snapshot");
}
