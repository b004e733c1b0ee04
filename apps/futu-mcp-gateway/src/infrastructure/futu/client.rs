//! OpenD TCP Client
//!
//! One `FutuClient` is one OpenD session: a TCP connection that has
//! completed `InitConnect`, with a background reader and keep-alive.
//!
//! # Concurrency
//!
//! Requests are multiplexed over the socket. Each request takes a fresh
//! serial and parks a oneshot sender in the pending map; the reader task
//! completes it when the reply with the same serial arrives. Push frames are
//! decoded and published to the [`PushHub`] instead.
//!
//! When the socket fails or the session is closed every pending request
//! resolves with [`ClientError::Closed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, read_frame, write_frame};
use super::keepalive::{KeepAliveConfig, KeepAliveEvent, KeepAliveManager, KeepAliveState};
use super::messages::{as_i64, decode_push, parse_reply, request_body};
use super::protocol;
use crate::domain::payload::VendorFailure;
use crate::infrastructure::broadcast::PushHub;
use crate::infrastructure::metrics;

/// Client version reported during the handshake.
const CLIENT_VER: i64 = 901;

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised by an OpenD session.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP connect failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// `host:port` dialled.
        endpoint: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// TCP connect did not finish in time.
    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),

    /// The gateway answered with a failure.
    #[error("{0}")]
    Vendor(VendorFailure),

    /// No reply before the request timeout.
    #[error("request {proto_id} timed out after {timeout:?}")]
    Timeout {
        /// Protocol id of the request.
        proto_id: u32,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The session is closed.
    #[error("connection to OpenD closed")]
    Closed,

    /// Frame encoding or socket write failed.
    #[error("frame error: {0}")]
    Codec(#[from] CodecError),
}

impl From<ClientError> for VendorFailure {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Vendor(failure) => failure,
            other => Self::new(other.to_string()),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Where and how to reach OpenD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// OpenD host.
    pub host: String,
    /// OpenD API port.
    pub port: u16,
    /// Client id sent in the handshake.
    pub client_id: String,
    /// Per-request reply timeout.
    pub request_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11111,
            client_id: "futu-mcp-gateway".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// `host:port`.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Client
// =============================================================================

type Waiter = oneshot::Sender<Result<Value, VendorFailure>>;
type PendingMap = Arc<Mutex<HashMap<u32, Waiter>>>;

/// An initialized OpenD session.
#[derive(Debug)]
pub struct FutuClient {
    endpoint: String,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_serial: AtomicU32,
    request_timeout: Duration,
    cancel: CancellationToken,
    closed: AtomicBool,
    conn_id: Mutex<Option<u64>>,
}

impl FutuClient {
    /// Connect and complete the handshake.
    ///
    /// Pushes are published to `pushes` when given; sessions without a hub
    /// discard them.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened or `InitConnect` is
    /// rejected.
    pub async fn connect(
        config: &ClientConfig,
        pushes: Option<Arc<PushHub>>,
    ) -> Result<Arc<Self>, ClientError> {
        let endpoint = config.endpoint();
        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| ClientError::ConnectTimeout(endpoint.clone()))?
        .map_err(|source| ClientError::Connect {
            endpoint: endpoint.clone(),
            source,
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let client = Arc::new(Self {
            endpoint: endpoint.clone(),
            writer: tokio::sync::Mutex::new(writer),
            pending: Arc::clone(&pending),
            next_serial: AtomicU32::new(1),
            request_timeout: config.request_timeout,
            cancel: cancel.clone(),
            closed: AtomicBool::new(false),
            conn_id: Mutex::new(None),
        });

        tokio::spawn(read_loop(reader, pending, pushes, cancel));

        let init = client
            .request(
                protocol::INIT_CONNECT,
                json!({
                    "clientVer": CLIENT_VER,
                    "clientID": config.client_id,
                    "recvNotify": true,
                    "packetEncAlgo": -1,
                    "pushProtoFmt": 1,
                    "programmingLanguage": "Rust",
                }),
            )
            .await;
        let s2c = match init {
            Ok(s2c) => s2c,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };

        let conn_id = s2c.get("connID").and_then(as_i64).and_then(|id| u64::try_from(id).ok());
        *client.conn_id.lock() = conn_id;
        let keepalive = KeepAliveConfig::from_gateway_interval(
            s2c.get("keepAliveInterval").and_then(as_i64).unwrap_or(0),
        );
        client.spawn_keepalive(keepalive);

        tracing::info!(
            endpoint = %endpoint,
            conn_id,
            keepalive_secs = keepalive.interval.as_secs(),
            "Connected to OpenD"
        );
        Ok(client)
    }

    /// Gateway-assigned connection id.
    #[must_use]
    pub fn conn_id(&self) -> Option<u64> {
        *self.conn_id.lock()
    }

    /// Whether the session can still carry requests.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Send a request and wait for its reply's `s2c` payload.
    ///
    /// # Errors
    ///
    /// Returns the vendor failure, a timeout, or `Closed` if the session
    /// ended before the reply arrived.
    pub async fn request(&self, proto_id: u32, c2s: Value) -> Result<Value, ClientError> {
        if !self.is_open() {
            return Err(ClientError::Closed);
        }
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(serial, tx);
        if !self.is_open() {
            self.pending.lock().remove(&serial);
            return Err(ClientError::Closed);
        }

        let started = Instant::now();
        let body = request_body(c2s);
        let written = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, proto_id, serial, &body).await
        };
        if let Err(e) = written {
            self.pending.lock().remove(&serial);
            metrics::record_vendor_request(proto_id, false, started.elapsed());
            return Err(e.into());
        }

        let outcome = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply.map_err(ClientError::Vendor),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                self.pending.lock().remove(&serial);
                Err(ClientError::Timeout {
                    proto_id,
                    timeout: self.request_timeout,
                })
            }
        };
        metrics::record_vendor_request(proto_id, outcome.is_ok(), started.elapsed());
        outcome
    }

    /// Close the session. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        if let Err(e) = self.writer.lock().await.shutdown().await {
            tracing::debug!(endpoint = %self.endpoint, error = %e, "Socket shutdown failed");
        }
        self.pending.lock().clear();
        tracing::info!(endpoint = %self.endpoint, conn_id = self.conn_id(), "Disconnected from OpenD");
    }

    fn spawn_keepalive(self: &Arc<Self>, config: KeepAliveConfig) {
        let state = Arc::new(KeepAliveState::new());
        let (event_tx, event_rx) = mpsc::channel(4);
        let manager =
            KeepAliveManager::new(config, Arc::clone(&state), event_tx, self.cancel.clone());
        tokio::spawn(manager.run());
        tokio::spawn(drive_keepalive(Arc::downgrade(self), state, event_rx));
    }
}

impl Drop for FutuClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    pending: PendingMap,
    pushes: Option<Arc<PushHub>>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            result = read_frame(&mut reader) => match result {
                Ok(frame) => frame,
                Err(e) => {
                    if !cancel.is_cancelled() {
                        tracing::warn!(error = %e, "OpenD read failed");
                    }
                    break;
                }
            },
        };

        if protocol::is_push(frame.proto_id) {
            if let Some(hub) = &pushes {
                for event in decode_push(frame.proto_id, &frame.body) {
                    hub.send(event);
                }
            }
            continue;
        }

        let waiter = pending.lock().remove(&frame.serial);
        match waiter {
            Some(tx) => {
                let _ = tx.send(parse_reply(&frame.body));
            }
            None => tracing::debug!(
                proto_id = frame.proto_id,
                serial = frame.serial,
                "Reply without a waiting request"
            ),
        }
    }

    cancel.cancel();
    // Dropping the senders resolves every waiter with `Closed`.
    pending.lock().clear();
}

async fn drive_keepalive(
    client: Weak<FutuClient>,
    state: Arc<KeepAliveState>,
    mut events: mpsc::Receiver<KeepAliveEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(client) = client.upgrade() else {
            break;
        };
        match event {
            KeepAliveEvent::Send => {
                state.mark_sent();
                let now = chrono::Utc::now().timestamp();
                match client.request(protocol::KEEP_ALIVE, json!({ "time": now })).await {
                    Ok(_) => state.record_ack(),
                    Err(e) => tracing::warn!(error = %e, "Keep-alive failed"),
                }
            }
            KeepAliveEvent::Timeout => {
                tracing::warn!(conn_id = client.conn_id(), "OpenD stopped answering keep-alives");
                client.close().await;
                break;
            }
        }
    }
}
