//! WebSocket transport.
//!
//! Serves `GET /ws` (the installation protocol), `GET /healthz`, and, when
//! configured, static client assets for every other path. Each accepted
//! socket gets its own task that forwards decoded client messages to the
//! hub and pushes every broadcast snapshot back down the socket.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::get;
use dashmap::DashMap;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use super::protocol::{self, ServerMessage};
use crate::error::TransportError;
use crate::hub::{HubHandle, Subscription};
use crate::observability::metrics;
use crate::session::ConnectionId;

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Address to bind to, e.g. `"0.0.0.0:3000"`.
    pub bind_addr: String,
    /// Largest accepted inbound message in bytes.
    pub max_message_size: usize,
    /// Static asset directory served for non-API paths.
    pub public_dir: Option<PathBuf>,
}

/// Per-connection bookkeeping.
#[derive(Debug)]
pub struct ConnectionState {
    /// Remote address of the client.
    pub remote_addr: SocketAddr,
    /// When the socket was accepted.
    pub connected_at: Instant,
}

struct WsShared {
    hub: HubHandle,
    connections: Arc<DashMap<ConnectionId, ConnectionState>>,
    next_connection_id: AtomicU64,
    max_message_size: usize,
    cancel: CancellationToken,
}

/// Removes a connection from tracking on every exit path and logs how long
/// it stayed open.
struct ConnectionGuard {
    connections: Arc<DashMap<ConnectionId, ConnectionState>>,
    connection_id: ConnectionId,
}

impl ConnectionGuard {
    fn new(
        connections: Arc<DashMap<ConnectionId, ConnectionState>>,
        connection_id: ConnectionId,
        state: ConnectionState,
    ) -> Self {
        connections.insert(connection_id, state);
        metrics::set_connections_active(connections.len());
        Self {
            connections,
            connection_id,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some((id, state)) = self.connections.remove(&self.connection_id) {
            info!(
                connection_id = %id,
                remote_addr = %state.remote_addr,
                duration = ?state.connected_at.elapsed(),
                "client disconnected"
            );
        }
        metrics::set_connections_active(self.connections.len());
    }
}

/// Running WebSocket server.
pub struct WsServer {
    shared: Arc<WsShared>,
    server_handle: JoinHandle<()>,
}

impl WsServer {
    /// Binds the listener and starts serving.
    ///
    /// Returns the server and the actual bound address (useful when binding
    /// to port 0).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::BindFailed`] if the listener cannot bind.
    pub async fn bind(
        config: WsConfig,
        hub: HubHandle,
        cancel: CancellationToken,
    ) -> Result<(Self, SocketAddr), TransportError> {
        let listener = TcpListener::bind(&config.bind_addr)
            .await
            .map_err(|e| TransportError::BindFailed(format!("{}: {e}", config.bind_addr)))?;

        let bound_addr = listener
            .local_addr()
            .map_err(|e| TransportError::BindFailed(format!("local_addr failed: {e}")))?;

        let shared = Arc::new(WsShared {
            hub,
            connections: Arc::new(DashMap::new()),
            next_connection_id: AtomicU64::new(1),
            max_message_size: config.max_message_size,
            cancel: cancel.clone(),
        });

        let router = build_router(Arc::clone(&shared), config.public_dir);
        let service = router.into_make_service_with_connect_info::<SocketAddr>();

        let server_handle = tokio::spawn(async move {
            axum::serve(listener, service)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await
                .ok();
            debug!("WebSocket server shut down");
        });
        info!(%bound_addr, "WebSocket server listening");

        Ok((
            Self {
                shared,
                server_handle,
            },
            bound_addr,
        ))
    }

    /// Number of open WebSocket connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.connections.len()
    }

    /// Starts a graceful shutdown.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    /// Waits for the listener task to finish.
    pub async fn join(self) {
        let _ = self.server_handle.await;
    }

    /// Resolves once the listener task has exited, without consuming the
    /// server. Do not call [`WsServer::join`] after this has resolved.
    pub async fn closed(&mut self) {
        let _ = (&mut self.server_handle).await;
    }
}

impl std::fmt::Debug for WsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsServer")
            .field("connections", &self.shared.connections.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Axum Router
// ============================================================================

fn build_router(shared: Arc<WsShared>, public_dir: Option<PathBuf>) -> Router {
    let router = Router::new()
        .route("/ws", get(handle_upgrade))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(shared);

    match public_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    }
}

async fn handle_upgrade(
    State(shared): State<Arc<WsShared>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let limit = shared.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_socket(socket, shared, remote_addr))
}

// ============================================================================
// Per-connection task
// ============================================================================

async fn handle_socket(socket: WebSocket, shared: Arc<WsShared>, remote_addr: SocketAddr) {
    let id = ConnectionId::new(shared.next_connection_id.fetch_add(1, Ordering::SeqCst));
    let _guard = ConnectionGuard::new(
        Arc::clone(&shared.connections),
        id,
        ConnectionState {
            remote_addr,
            connected_at: Instant::now(),
        },
    );

    let Ok(Subscription {
        initial,
        mut updates,
    }) = shared.hub.connect(id).await
    else {
        debug!(connection_id = %id, "hub closed before connect");
        return;
    };
    info!(connection_id = %id, %remote_addr, "client connected");

    let (mut sender, mut receiver) = socket.split();

    if send(&mut sender, &ServerMessage::InitialState(initial))
        .await
        .is_ok()
    {
        loop {
            tokio::select! {
                () = shared.cancel.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match protocol::decode(text.as_str()) {
                            Ok(message) => {
                                if shared.hub.send(id, message).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                metrics::record_malformed_frame();
                                debug!(connection_id = %id, error = %e, "dropping frame");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        metrics::record_malformed_frame();
                        debug!(connection_id = %id, "dropping binary frame");
                    }
                    // Pings are answered by the WebSocket layer.
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(connection_id = %id, error = %e, "receive failed");
                        break;
                    }
                },
                update = updates.recv() => match update {
                    Ok(snapshot) => {
                        let message = ServerMessage::StateUpdate(snapshot.as_ref().clone());
                        if send(&mut sender, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Snapshots are full state; the next one catches the client up.
                        warn!(connection_id = %id, skipped, "client lagging, skipping ahead");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    let _ = shared.hub.disconnect(id).await;
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), TransportError> {
    let text = protocol::encode(message)
        .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))
}

// ============================================================================
// Helpers
// ============================================================================

/// Normalizes a bind address to `host:port` form.
///
/// Accepts:
/// - `:3000` → `0.0.0.0:3000`
/// - `3000` → `0.0.0.0:3000`
/// - `127.0.0.1:3000` → as-is
///
/// # Errors
///
/// Returns [`TransportError::BindFailed`] if the result is not a valid
/// socket address.
pub fn parse_bind_addr(input: &str) -> Result<String, TransportError> {
    let input = input.trim();
    let addr = if input.starts_with(':') {
        format!("0.0.0.0{input}")
    } else if input.parse::<u16>().is_ok() {
        format!("0.0.0.0:{input}")
    } else {
        input.to_string()
    };
    addr.parse::<SocketAddr>().map_err(|e| {
        TransportError::BindFailed(format!("invalid bind address \"{input}\": {e}"))
    })?;
    Ok(addr)
}

// ============================================================================
// Tests
// ============================================================================
