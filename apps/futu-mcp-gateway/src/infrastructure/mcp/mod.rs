//! MCP Stdio Server
//!
//! Newline-delimited JSON-RPC over stdin/stdout. Serves the tool catalogue,
//! two resource templates (`market://{symbol}`, `kline://{symbol}/{ktype}`)
//! and two prompts. Requests are answered in arrival order; notifications
//! get no reply.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::application::services::ToolDispatcher;
use crate::application::tools::{DEFAULT_KLINE_COUNT, ToolCall, catalog};
use crate::domain::market::{KlType, Symbol};
use crate::domain::payload::ToolResult;
use crate::infrastructure::metrics::{self, Transport};
use crate::infrastructure::rpc::{RpcError, RpcRequest, RpcResponse, codes};

/// Protocol version answered when the client does not name one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Registry key for calls arriving over stdio.
pub const STDIO_CLIENT_ID: &str = "stdio";

const SERVER_NAME: &str = "futu-mcp-gateway";

/// MCP server errors.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Reading stdin or writing stdout failed.
    #[error("stdio transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stdio MCP server.
pub struct McpServer {
    dispatcher: Arc<ToolDispatcher>,
    version: String,
    cancel: CancellationToken,
}

impl McpServer {
    /// Create a server reporting `version` in `initialize`.
    #[must_use]
    pub const fn new(
        dispatcher: Arc<ToolDispatcher>,
        version: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            version,
            cancel,
        }
    }

    /// Serve until `reader` reaches end of input or the token fires.
    ///
    /// # Errors
    ///
    /// Returns `McpError::Io` if the transport fails.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<(), McpError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        tracing::info!("MCP stdio server started");

        loop {
            let line = tokio::select! {
                () = self.cancel.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                tracing::info!("MCP input closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            if let Some(reply) = self.handle_line(&line).await {
                let mut frame = reply.to_string();
                frame.push('\n');
                writer.write_all(frame.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Answer one input line; `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!(error = %e, "Unparseable MCP frame");
                let error = RpcError::new(codes::PARSE_ERROR, "Parse error");
                return Some(RpcResponse::failure(Value::Null, error).to_value());
            }
        };

        let Some(method) = request.method.clone() else {
            let error = RpcError::new(codes::INVALID_REQUEST, "Invalid request: missing method");
            return Some(
                RpcResponse::failure(request.id.unwrap_or(Value::Null), error).to_value(),
            );
        };

        let Some(id) = request.id.clone() else {
            tracing::debug!(method = %method, "MCP notification");
            return None;
        };

        let outcome = self.dispatch(&method, request.params_or_null()).await;
        Some(match outcome {
            Ok(result) => RpcResponse::success(id, result).to_value(),
            Err(error) => RpcResponse::failure(id, error).to_value(),
        })
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools_list()),
            "tools/call" => self.tools_call(params).await,
            "resources/list" => Ok(json!({"resources": []})),
            "resources/templates/list" => Ok(resource_templates()),
            "resources/read" => self.resources_read(&params).await,
            "prompts/list" => Ok(prompts_list()),
            "prompts/get" => prompts_get(&params),
            other => Err(RpcError::new(
                codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        }
    }

    fn initialize(&self, params: &Value) -> Value {
        let protocol = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        json!({
            "protocolVersion": protocol,
            "capabilities": {
                "tools": {"listChanged": false},
                "resources": {"subscribe": false, "listChanged": false},
                "prompts": {"listChanged": false},
            },
            "serverInfo": {"name": SERVER_NAME, "version": self.version},
        })
    }

    async fn tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("tools/call requires a tool name"))?
            .to_string();
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let call = ToolCall::parse(&name, arguments)
            .map_err(|e| RpcError::new(codes::INVALID_PARAMS, e.to_string()))?;
        let result = self.run_tool(call).await;

        Ok(json!({
            "content": [{"type": "text", "text": result.to_value().to_string()}],
            "isError": result.is_error(),
        }))
    }

    async fn resources_read(&self, params: &Value) -> Result<Value, RpcError> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("resources/read requires a uri"))?;
        let call = resource_call(uri)?;
        let result = self.run_tool(call).await;

        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "application/json",
                "text": result.to_value().to_string(),
            }]
        }))
    }

    async fn run_tool(&self, call: ToolCall) -> ToolResult {
        let tool = call.name();
        let started = Instant::now();
        let result = self.dispatcher.call(STDIO_CLIENT_ID, call).await;
        metrics::record_tool_call(tool, Transport::Mcp, !result.is_error(), started.elapsed());
        result
    }
}

fn invalid_params(message: &str) -> RpcError {
    RpcError::new(codes::INVALID_PARAMS, message)
}

// =============================================================================
// Catalogue Views
// =============================================================================

fn tools_list() -> Value {
    let tools: Vec<Value> = catalog()
        .into_iter()
        .map(|spec| {
            json!({
                "name": spec.name,
                "description": spec.description,
                "inputSchema": spec.input_schema,
            })
        })
        .collect();
    json!({"tools": tools})
}

fn resource_templates() -> Value {
    json!({
        "resourceTemplates": [
            {
                "uriTemplate": "market://{symbol}",
                "name": "Market snapshot",
                "mimeType": "application/json",
            },
            {
                "uriTemplate": "kline://{symbol}/{ktype}",
                "name": "Current K-line",
                "mimeType": "application/json",
            },
        ]
    })
}

/// Map a resource URI onto the tool that serves it.
fn resource_call(uri: &str) -> Result<ToolCall, RpcError> {
    let unknown = || invalid_params(&format!("Unknown resource: {uri}"));

    if let Some(rest) = uri.strip_prefix("market://") {
        let symbol: Symbol = rest.parse().map_err(|_| unknown())?;
        return Ok(ToolCall::GetMarketSnapshot {
            symbols: vec![symbol],
        });
    }
    if let Some(rest) = uri.strip_prefix("kline://")
        && let Some((symbol, ktype)) = rest.split_once('/')
    {
        let symbol: Symbol = symbol.parse().map_err(|_| unknown())?;
        let ktype: KlType = ktype.parse().map_err(|_| unknown())?;
        return Ok(ToolCall::GetCurKline {
            symbol,
            ktype,
            count: DEFAULT_KLINE_COUNT,
        });
    }
    Err(unknown())
}

// =============================================================================
// Prompts
// =============================================================================

fn prompts_list() -> Value {
    json!({
        "prompts": [
            {
                "name": "market_analysis",
                "description": "Analyze market data for a symbol",
                "arguments": [
                    {"name": "symbol", "description": "Market-prefixed code", "required": true},
                ],
            },
            {
                "name": "option_strategy",
                "description": "Analyze option strategies for a symbol and expiry",
                "arguments": [
                    {"name": "symbol", "description": "Underlying code", "required": true},
                    {"name": "expiry", "description": "Expiry date, yyyy-MM-dd", "required": true},
                ],
            },
        ]
    })
}

fn prompts_get(params: &Value) -> Result<Value, RpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_params("prompts/get requires a prompt name"))?;
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
    let arg = |key: &str| {
        args.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| invalid_params(&format!("Prompt {name} requires argument {key}")))
    };

    let (description, text) = match name {
        "market_analysis" => {
            let symbol = arg("symbol")?;
            (
                "Analyze market data for a symbol",
                format!("Please analyze the market data for {symbol}"),
            )
        }
        "option_strategy" => {
            let symbol = arg("symbol")?;
            let expiry = arg("expiry")?;
            (
                "Analyze option strategies for a symbol and expiry",
                format!("Please analyze option strategies for {symbol} expiring on {expiry}"),
            )
        }
        other => return Err(invalid_params(&format!("Unknown prompt: {other}"))),
    };

    Ok(json!({
        "description": description,
        "messages": [{"role": "user", "content": {"type": "text", "text": text}}],
    }))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_resource_maps_to_snapshot() {
        let call = resource_call("market://HK.00700").unwrap();
        assert_eq!(
            call,
            ToolCall::GetMarketSnapshot {
                symbols: vec!["HK.00700".parse().unwrap()],
            }
        );
    }

    #[test]
    fn kline_resource_maps_to_current_kline() {
        let call = resource_call("kline://US.AAPL/K_DAY").unwrap();
        assert_eq!(
            call,
            ToolCall::GetCurKline {
                symbol: "US.AAPL".parse().unwrap(),
                ktype: KlType::KDay,
                count: DEFAULT_KLINE_COUNT,
            }
        );
    }

    #[test]
    fn unknown_resource_is_invalid_params() {
        for uri in ["file:///etc/passwd", "kline://US.AAPL", "market://nodot"] {
            let err = resource_call(uri).unwrap_err();
            assert_eq!(err.code, codes::INVALID_PARAMS, "{uri}");
        }
    }

    #[test]
    fn prompt_text_interpolates_arguments() {
        let prompt = prompts_get(&json!({
            "name": "option_strategy",
            "arguments": {"symbol": "US.AAPL", "expiry": "2026-12-18"},
        }))
        .unwrap();
        assert_eq!(
            prompt["messages"][0]["content"]["text"],
            "Please analyze option strategies for US.AAPL expiring on 2026-12-18"
        );
    }

    #[test]
    fn prompt_missing_argument_is_rejected() {
        let err = prompts_get(&json!({"name": "market_analysis", "arguments": {}})).unwrap_err();
        assert_eq!(err.code, codes::INVALID_PARAMS);
    }

    #[test]
    fn tools_list_uses_camel_case_schema_key() {
        let listed = tools_list();
        let first = &listed["tools"][0];
        assert_eq!(first["name"], "get_global_state");
        assert!(first.get("inputSchema").is_some());
    }
}
