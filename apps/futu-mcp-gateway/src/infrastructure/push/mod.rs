//! WebSocket Push Feed
//!
//! JSON-RPC over WebSocket at `GET /ws/{client_id}`. A connected client may
//! call `subscribe`, `unsubscribe`, `get_subscription` and every data tool;
//! vendor pushes for the pairs it holds are forwarded as `push`
//! notifications. Every error uses code `-32000`.
//!
//! Subscriptions are keyed by the `client_id` path segment. One socket may
//! be connected per id at a time; a second upgrade for a connected id is
//! refused with `409 Conflict`. When the socket closes the client's
//! subscriptions are released, and only then can the id connect again.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::application::services::ToolDispatcher;
use crate::application::tools::ToolCall;
use crate::infrastructure::broadcast::{PushEvent, PushHub};
use crate::infrastructure::metrics::{self, Transport};
use crate::infrastructure::rpc::{RpcError, RpcNotification, RpcRequest, RpcResponse, codes};

// =============================================================================
// State
// =============================================================================

/// Shared state for push-feed sessions.
pub struct PushFeedState {
    dispatcher: Arc<ToolDispatcher>,
    pushes: Arc<PushHub>,
    cancel: CancellationToken,
    sessions: AtomicUsize,
    connected: Mutex<HashSet<String>>,
}

impl PushFeedState {
    /// Create state; sessions close when `cancel` fires.
    #[must_use]
    pub fn new(
        dispatcher: Arc<ToolDispatcher>,
        pushes: Arc<PushHub>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            pushes,
            cancel,
            sessions: AtomicUsize::new(0),
            connected: Mutex::new(HashSet::new()),
        }
    }

    /// Connected sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Whether a socket is connected for `client_id`.
    #[must_use]
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.connected.lock().contains(client_id)
    }
}

/// Exclusive use of a client id; released on drop.
struct ClientClaim {
    state: Arc<PushFeedState>,
    client_id: String,
}

impl ClientClaim {
    fn take(state: &Arc<PushFeedState>, client_id: &str) -> Option<Self> {
        state
            .connected
            .lock()
            .insert(client_id.to_string())
            .then(|| Self {
                state: Arc::clone(state),
                client_id: client_id.to_string(),
            })
    }
}

impl Drop for ClientClaim {
    fn drop(&mut self) {
        self.state.connected.lock().remove(&self.client_id);
    }
}

// =============================================================================
// Server
// =============================================================================

/// WebSocket push-feed server.
pub struct PushFeedServer {
    host: String,
    port: u16,
    state: Arc<PushFeedState>,
}

impl PushFeedServer {
    /// Create a server.
    #[must_use]
    pub const fn new(host: String, port: u16, state: Arc<PushFeedState>) -> Self {
        Self { host, port, state }
    }

    /// Serve until the state's cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `PushServerError` if binding fails or the server stops with
    /// an error.
    pub async fn run(self) -> Result<(), PushServerError> {
        let endpoint = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(endpoint.as_str())
            .await
            .map_err(|e| PushServerError::BindFailed(endpoint.clone(), e.to_string()))?;
        let local = listener.local_addr().ok();
        tracing::info!(endpoint = %endpoint, local = ?local, "Push feed listening");

        let cancel = self.state.cancel.clone();
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| PushServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Push feed stopped");
        Ok(())
    }
}

/// Routes for the push feed.
pub fn router(state: Arc<PushFeedState>) -> Router {
    Router::new()
        .route("/ws/{client_id}", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<PushFeedState>>,
) -> Response {
    let Some(claim) = ClientClaim::take(&state, &client_id) else {
        tracing::warn!(client = %client_id, "Refusing second push feed session for client");
        return (StatusCode::CONFLICT, "client id already connected").into_response();
    };
    ws.on_upgrade(move |socket| run_session(socket, claim))
}

// =============================================================================
// Session
// =============================================================================

async fn run_session(socket: WebSocket, claim: ClientClaim) {
    let state = Arc::clone(&claim.state);
    let client_id = claim.client_id.clone();
    let session_id = uuid::Uuid::new_v4();
    let count = state.sessions.fetch_add(1, Ordering::Relaxed) + 1;
    metrics::set_push_sessions(count);
    tracing::info!(client = %client_id, %session_id, "Push feed client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut pushes = state.pushes.subscribe_rx();

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_message(&state.dispatcher, &client_id, text.as_str()).await;
                    if sender.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(client = %client_id, error = %e, "Push feed socket error");
                    break;
                }
            },
            push = pushes.recv() => match push {
                Ok(event) => {
                    let registry = state.dispatcher.registry();
                    if !registry.is_subscribed(&client_id, &event.symbol, event.feed) {
                        continue;
                    }
                    let frame = push_notification(&event).to_string();
                    if sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    metrics::record_pushes_dropped(skipped);
                    tracing::warn!(client = %client_id, skipped, "Push feed client lagging");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    state.dispatcher.release_client(&client_id).await;
    let count = state.sessions.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
    metrics::set_push_sessions(count);
    tracing::info!(client = %client_id, %session_id, "Push feed client disconnected");
    drop(claim);
}

/// Answer one inbound text frame.
///
/// Malformed frames, unknown methods and invalid parameters produce a
/// `-32000` error and leave subscription state untouched.
pub async fn handle_message(dispatcher: &ToolDispatcher, client_id: &str, text: &str) -> Value {
    let request: RpcRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            return server_error(Value::Null, format!("Parse error: {e}"));
        }
    };
    let (Some(id), Some(method)) = (request.id.clone(), request.method.as_deref()) else {
        return server_error(
            request.id.clone().unwrap_or(Value::Null),
            "Invalid request: missing method or id".to_string(),
        );
    };

    if method == "get_subscription" {
        let set = dispatcher.subscriptions(client_id);
        let result = serde_json::to_value(&set).unwrap_or_else(|_| json!({}));
        return RpcResponse::success(id, result).to_value();
    }

    let call = match ToolCall::parse(method, request.params_or_null()) {
        Ok(call) => call,
        Err(e) => return server_error(id, e.to_string()),
    };

    let tool = call.name();
    let started = Instant::now();
    let result = dispatcher.call(client_id, call).await;
    metrics::record_tool_call(tool, Transport::PushFeed, !result.is_error(), started.elapsed());
    RpcResponse::success(id, result.to_value()).to_value()
}

fn server_error(id: Value, message: String) -> Value {
    RpcResponse::failure(id, RpcError::new(codes::SERVER_ERROR, message)).to_value()
}

fn push_notification(event: &PushEvent) -> Value {
    let note = RpcNotification::new(
        "push",
        json!({
            "symbol": event.symbol.to_string(),
            "sub_type": event.feed.as_str(),
            "proto_id": event.proto_id,
            "data": event.records,
        }),
    );
    serde_json::to_value(note).unwrap_or(Value::Null)
}

// =============================================================================
// Errors
// =============================================================================

/// Push feed server errors.
#[derive(Debug, thiserror::Error)]
pub enum PushServerError {
    /// Failed to bind.
    #[error("failed to bind push feed to {0}: {1}")]
    BindFailed(String, String),

    /// Server error.
    #[error("push feed error: {0}")]
    ServerFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{FeedType, QotMarket, Symbol};
    use crate::domain::payload::Record;

    #[test]
    fn push_notification_shape() {
        let mut record = Record::new();
        record.insert("price".to_string(), json!(320.0));
        let event = PushEvent {
            symbol: Symbol::new(QotMarket::Hk, "00700"),
            feed: FeedType::Ticker,
            proto_id: 3011,
            records: vec![record],
        };

        assert_eq!(
            push_notification(&event),
            json!({
                "jsonrpc": "2.0",
                "method": "push",
                "params": {
                    "symbol": "HK.00700",
                    "sub_type": "TICKER",
                    "proto_id": 3011,
                    "data": [{"price": 320.0}],
                },
            })
        );
    }
}
