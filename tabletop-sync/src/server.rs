//! WebSocket push adapter.
//!
//! Architecture:
//! ```text
//! Client A ──┐                    ┌── outbox A ──► Client A
//!             ├── SyncServer ── SyncHub ── outbox B ──► Client B
//! Client B ──┘   (one task per       └── outbox C ──► Client C
//!                 connection)
//! ```
//!
//! Per connection:
//! 1. register with the hub and push `initialState` to this peer only,
//! 2. apply every inbound `updatePlacement` and fan it out to the others,
//! 3. forward outbox frames (fan-out from other peers, resets) to the socket,
//! 4. unregister on close, socket error, or once pruned by the registry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use crate::hub::SyncHub;
use crate::protocol::{ClientMessage, ConnectionId, ProtocolError, ServerMessage};
use crate::store::PlacementStore;

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Request/response (HTTP) bind address
    pub http_addr: String,
    /// Push (WebSocket) bind address
    pub push_addr: String,
    /// Frames buffered per push peer before it is pruned
    pub outbox_capacity: usize,
    /// Seed the store with a shuffled deck at startup
    pub deal_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:3000".to_string(),
            push_addr: "127.0.0.1:3001".to_string(),
            outbox_capacity: 256,
            deal_on_start: true,
        }
    }
}

impl ServerConfig {
    /// Read `TABLETOP_*` variables, keeping defaults for anything unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = lookup("TABLETOP_HTTP_ADDR") {
            config.http_addr = addr;
        }
        if let Some(addr) = lookup("TABLETOP_PUSH_ADDR") {
            config.push_addr = addr;
        }
        if let Some(raw) = lookup("TABLETOP_OUTBOX_CAPACITY") {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => config.outbox_capacity = n,
                _ => log::warn!(
                    "Ignoring TABLETOP_OUTBOX_CAPACITY={raw:?}, using {}",
                    config.outbox_capacity
                ),
            }
        }
        if let Some(raw) = lookup("TABLETOP_DEAL") {
            match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.deal_on_start = true,
                "0" | "false" | "no" | "off" => config.deal_on_start = false,
                _ => log::warn!(
                    "Ignoring TABLETOP_DEAL={raw:?}, using {}",
                    config.deal_on_start
                ),
            }
        }
        config
    }
}

/// Push connection statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub malformed_messages: u64,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
    malformed_messages: AtomicU64,
}

impl AtomicServerStats {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            malformed_messages: self.malformed_messages.load(Ordering::Relaxed),
        }
    }
}

/// The push server.
pub struct SyncServer {
    config: ServerConfig,
    hub: Arc<SyncHub>,
    stats: Arc<AtomicServerStats>,
}

impl SyncServer {
    /// Create a server around an existing hub (shared with the HTTP adapter).
    pub fn new(config: ServerConfig, hub: Arc<SyncHub>) -> Self {
        Self {
            config,
            hub,
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    /// Create with default configuration and an empty store.
    pub fn with_defaults() -> Self {
        let config = ServerConfig::default();
        let hub = Arc::new(SyncHub::new(PlacementStore::new(), config.outbox_capacity));
        Self::new(config, hub)
    }

    /// Bind `push_addr` and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.push_addr).await?;
        self.serve(listener).await
    }

    /// Serve push connections from an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Push server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<SyncHub>,
        stats: Arc<AtomicServerStats>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let mut joined = hub.join().await;
        let conn_id = joined.id;
        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);
        log::info!("Peer {conn_id} connected from {addr}");

        let result = async {
            let initial = ServerMessage::InitialState(std::mem::take(&mut joined.snapshot));
            ws_sender.send(Message::text(initial.encode()?)).await?;

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                stats.total_messages.fetch_add(1, Ordering::Relaxed);
                                let decoded = ClientMessage::decode(text.as_str());
                                Self::handle_inbound(&hub, &stats, conn_id, decoded).await;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                stats.total_messages.fetch_add(1, Ordering::Relaxed);
                                let decoded = ClientMessage::decode_bytes(&data);
                                Self::handle_inbound(&hub, &stats, conn_id, decoded).await;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Peer {conn_id} closed the connection");
                                break;
                            }
                            Some(Err(e)) => {
                                log::warn!("WebSocket error from {conn_id}: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }

                    frame = joined.outbox.recv() => {
                        match frame {
                            Some(frame) => {
                                ws_sender.send(Message::text(frame.to_string())).await?;
                            }
                            None => {
                                // Registry dropped our outbox: we were pruned.
                                log::info!("Peer {conn_id} pruned from registry, closing");
                                let _ = ws_sender.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                }
            }
            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
        }
        .await;

        hub.leave(&conn_id).await;
        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        log::debug!("Peer {conn_id} cleaned up");
        result
    }

    async fn handle_inbound(
        hub: &SyncHub,
        stats: &AtomicServerStats,
        conn_id: ConnectionId,
        decoded: Result<ClientMessage, ProtocolError>,
    ) {
        let outcome = match decoded {
            Ok(ClientMessage::UpdatePlacement(update)) => {
                hub.update_placement(Some(conn_id), update).await.map(|_| ())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            stats.malformed_messages.fetch_add(1, Ordering::Relaxed);
            log::warn!("Rejected message from {conn_id}: {e}");
            hub.send_to(&conn_id, &ServerMessage::error(e.to_string())).await;
        }
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<SyncHub> {
        &self.hub
    }
}
