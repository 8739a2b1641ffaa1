//! Sync clients for both transports.
//!
//! Provides:
//! - [`PushConnection`]: WebSocket, receives `initialState` once and then
//!   remote `placementChanged` / `stateReset` events
//! - [`PollingConnection`]: plain HTTP requests, no server push
//! - [`Connection`]: the two variants behind one capability set, picked once
//!   at construction
//! - [`SyncClient`]: connection lifecycle plus a [`Reconciler`] over the
//!   local presentation
//!
//! State machine:
//! ```text
//! push:     Disconnected ─► Connecting ─► Synchronized ──(events)──┐
//!                ▲                             │ ◄─────────────────┘
//!                └──────── disconnect / socket closed ◄──┘
//!
//! polling:  Disconnected ─► Requesting ─► Ready ─(refresh)─► Requesting ─► Ready
//! ```

use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header;
use hyper::{Method, Request, Uri};
use hyper_util::rt::TokioIo;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use tabletop_core::{
    accepts_drop, can_pick_up, CardId, ContainerId, EntityId, Placement, PlacementUpdate,
    Position, Snapshot,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::http::{ResetAck, StateResponse};
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::reconcile::{Presentation, Reconciler};

const OUTGOING_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;

/// Bytes escaped when an entity id becomes one URL path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),
    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid server url {0:?}")]
    InvalidUrl(String),
    #[error("server answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("bad response body: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("expected initialState, got {0}")]
    UnexpectedMessage(&'static str),
    #[error("connection closed")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("{0}")]
    Unsupported(&'static str),
    #[error("{entity} cannot be dropped on {container}")]
    DropRejected { entity: EntityId, container: ContainerId },
    #[error("{0} is not on top of the pool")]
    DragRejected(EntityId),
}

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Push: socket opening, waiting for `initialState`
    Connecting,
    /// Push: initial state applied, events flowing
    Synchronized,
    /// Polling: a state request is in flight
    Requesting,
    /// Polling: last state request applied
    Ready,
}

/// WebSocket connection to the push adapter.
pub struct PushConnection {
    url: String,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_rx: Option<mpsc::Receiver<ServerMessage>>,
    reader: Option<JoinHandle<()>>,
}

impl PushConnection {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outgoing_tx: None,
            event_rx: None,
            reader: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_open(&self) -> bool {
        self.outgoing_tx.is_some()
    }

    /// Open the socket and wait for the one-time `initialState`.
    pub async fn open(&mut self) -> Result<Snapshot, ClientError> {
        self.close();

        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to the socket, close when the
        // channel is dropped.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTGOING_CAPACITY);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::text(text)).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        // Reader task: parse server frames into events.
        let (event_tx, mut event_rx) = mpsc::channel::<ServerMessage>(EVENT_CAPACITY);
        let url = self.url.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let decoded = match msg {
                    Ok(Message::Text(text)) => ServerMessage::decode(text.as_str()),
                    Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                        Ok(text) => ServerMessage::decode(text),
                        Err(_) => Err(ProtocolError::NotUtf8),
                    },
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        log::warn!("Push connection to {url} failed: {e}");
                        break;
                    }
                    _ => continue,
                };
                match decoded {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("Ignoring undecodable frame from {url}: {e}"),
                }
            }
            log::debug!("Push reader for {url} finished");
        });

        match event_rx.recv().await {
            Some(ServerMessage::InitialState(snapshot)) => {
                self.outgoing_tx = Some(out_tx);
                self.event_rx = Some(event_rx);
                self.reader = Some(reader);
                log::info!("Connected to {} ({} cards)", self.url, snapshot.len());
                Ok(snapshot)
            }
            Some(other) => {
                reader.abort();
                Err(ClientError::UnexpectedMessage(other.kind()))
            }
            None => {
                reader.abort();
                Err(ClientError::Closed)
            }
        }
    }

    pub async fn send_placement(&self, update: &PlacementUpdate) -> Result<(), ClientError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        let encoded = ClientMessage::UpdatePlacement(update.clone()).encode()?;
        tx.send(encoded).await.map_err(|_| ClientError::Closed)
    }

    /// Next server event; `None` once the socket is gone.
    pub async fn next_event(&mut self) -> Option<ServerMessage> {
        match self.event_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    pub fn close(&mut self) {
        // Dropping the sender makes the writer send Close and exit.
        self.outgoing_tx = None;
        self.event_rx = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for PushConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// HTTP connection to the request/response adapter.
///
/// Every call opens its own HTTP/1.1 connection; there is no session.
#[derive(Debug, Clone)]
pub struct PollingConnection {
    /// `host:port` to dial
    addr: String,
    /// Value of the `Host` header
    authority: String,
    /// Path prefix such as `/api`, without trailing slash
    base_path: String,
}

impl PollingConnection {
    /// Accepts `http://host:port` with an optional path prefix.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let invalid = || ClientError::InvalidUrl(base_url.to_string());
        let uri: Uri = base_url.parse().map_err(|_| invalid())?;
        if uri.scheme_str() != Some("http") {
            return Err(invalid());
        }
        let authority = uri.authority().ok_or_else(invalid)?;
        let addr = match authority.port_u16() {
            Some(_) => authority.as_str().to_string(),
            None => format!("{}:80", authority.host()),
        };
        Ok(Self {
            addr,
            authority: authority.as_str().to_string(),
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    pub async fn fetch_state(&self) -> Result<StateResponse, ClientError> {
        let body = self.request(Method::GET, "/state", None).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn fetch_snapshot(&self) -> Result<Snapshot, ClientError> {
        Ok(Snapshot {
            cards: self.fetch_state().await?.cards,
        })
    }

    /// `PUT /cards/{id}`, returning the placement the server stored.
    pub async fn put_placement(
        &self,
        update: &PlacementUpdate,
    ) -> Result<PlacementUpdate, ClientError> {
        let body = serde_json::to_string(&update.placement)?;
        let path = card_path(&update.entity_id);
        let response = self.request(Method::PUT, &path, Some(body)).await?;
        Ok(serde_json::from_slice(&response)?)
    }

    pub async fn reset(&self, snapshot: Option<&Snapshot>) -> Result<ResetAck, ClientError> {
        let body = snapshot.map(serde_json::to_string).transpose()?;
        let response = self.request(Method::POST, "/reset", body).await?;
        Ok(serde_json::from_slice(&response)?)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        json: Option<String>,
    ) -> Result<Bytes, ClientError> {
        let stream = TcpStream::connect(&self.addr).await?;
        let (mut sender, conn) =
            hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                log::debug!("HTTP connection closed with error: {e}");
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(format!("{}{}", self.base_path, path))
            .header(header::HOST, self.authority.as_str())
            .header(header::ACCEPT, "application/json");
        let body = match json {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(json))
            }
            None => Full::new(Bytes::new()),
        };

        let response = sender.send_request(builder.body(body)?).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(bytes)
    }
}

/// `/cards/{id}` with the id escaped as a single path segment.
fn card_path(entity_id: &EntityId) -> String {
    format!("/cards/{}", utf8_percent_encode(entity_id.as_str(), PATH_SEGMENT))
}

/// A client's link to the server, fixed at construction.
pub enum Connection {
    Push(PushConnection),
    Polling(PollingConnection),
}

impl Connection {
    /// Establish the link and obtain the full state once.
    pub async fn open(&mut self) -> Result<Snapshot, ClientError> {
        match self {
            Connection::Push(push) => push.open().await,
            Connection::Polling(polling) => polling.fetch_snapshot().await,
        }
    }

    /// Pull the latest state. Push links receive state by push only.
    pub async fn fetch_snapshot(&mut self) -> Result<Snapshot, ClientError> {
        match self {
            Connection::Push(_) => Err(ClientError::Unsupported(
                "push connections do not pull state",
            )),
            Connection::Polling(polling) => polling.fetch_snapshot().await,
        }
    }

    /// Send a placement; returns the server's echo when the transport has one.
    pub async fn send_placement(
        &mut self,
        update: &PlacementUpdate,
    ) -> Result<Option<PlacementUpdate>, ClientError> {
        match self {
            Connection::Push(push) => push.send_placement(update).await.map(|_| None),
            Connection::Polling(polling) => polling.put_placement(update).await.map(Some),
        }
    }

    /// Next remote event. Polling links have none and return `None` at once.
    pub async fn next_remote(&mut self) -> Option<ServerMessage> {
        match self {
            Connection::Push(push) => push.next_event().await,
            Connection::Polling(_) => None,
        }
    }

    pub fn close(&mut self) {
        if let Connection::Push(push) = self {
            push.close();
        }
    }

    fn is_push(&self) -> bool {
        matches!(self, Connection::Push(_))
    }
}

/// Connection lifecycle plus reconciliation into a local presentation.
pub struct SyncClient<P> {
    connection: Connection,
    reconciler: Reconciler<P>,
    state: ConnectionState,
}

impl<P: Presentation> SyncClient<P> {
    pub fn new(connection: Connection, presentation: P) -> Self {
        Self {
            connection,
            reconciler: Reconciler::new(presentation),
            state: ConnectionState::Disconnected,
        }
    }

    /// Client bound to the push adapter, e.g. `ws://127.0.0.1:3001`.
    pub fn push(url: impl Into<String>, presentation: P) -> Self {
        Self::new(Connection::Push(PushConnection::new(url)), presentation)
    }

    /// Client bound to the request/response adapter, e.g. `http://127.0.0.1:3000`.
    pub fn polling(base_url: &str, presentation: P) -> Result<Self, ClientError> {
        Ok(Self::new(
            Connection::Polling(PollingConnection::new(base_url)?),
            presentation,
        ))
    }

    /// Run the connect sequence and reconcile the full state.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        let (pending, done) = if self.connection.is_push() {
            (ConnectionState::Connecting, ConnectionState::Synchronized)
        } else {
            (ConnectionState::Requesting, ConnectionState::Ready)
        };

        self.state = pending;
        match self.connection.open().await {
            Ok(snapshot) => {
                self.reconciler.apply(&snapshot);
                self.state = done;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Polling only: fetch and reconcile the latest server state.
    pub async fn refresh(&mut self) -> Result<(), ClientError> {
        if self.state != ConnectionState::Ready {
            return Err(match self.state {
                ConnectionState::Disconnected => ClientError::NotConnected,
                _ => ClientError::Unsupported(
                    "refresh is only available on a ready polling client",
                ),
            });
        }

        self.state = ConnectionState::Requesting;
        match self.connection.fetch_snapshot().await {
            Ok(snapshot) => {
                self.reconciler.apply(&snapshot);
                self.state = ConnectionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Local gesture started: remote updates for this entity are held off.
    ///
    /// A card sitting in the pool can only be picked up from the top of the
    /// stack.
    pub fn begin_drag(&mut self, entity_id: impl Into<EntityId>) -> Result<(), ClientError> {
        let entity_id = entity_id.into();
        if CardId::parse(entity_id.as_str()).is_ok()
            && !can_pick_up(self.reconciler.table(), entity_id.as_str())
        {
            return Err(ClientError::DragRejected(entity_id));
        }
        self.reconciler.begin_drag(entity_id);
        Ok(())
    }

    /// Local gesture abandoned; nothing is sent.
    pub fn cancel_drag(&mut self) -> Option<EntityId> {
        self.reconciler.cancel_drag()
    }

    /// Local drop: apply immediately, then send.
    ///
    /// Cards follow the drop rule (own suit or the pool); other entities may
    /// go anywhere.
    pub async fn release(
        &mut self,
        entity_id: impl Into<EntityId>,
        container_id: impl Into<ContainerId>,
        position: Position,
    ) -> Result<PlacementUpdate, ClientError> {
        let entity_id = entity_id.into();
        let container_id = container_id.into();

        if let Ok(card) = CardId::parse(entity_id.as_str()) {
            if !accepts_drop(container_id.as_str(), &card) {
                self.reconciler.cancel_drag();
                return Err(ClientError::DropRejected {
                    entity: entity_id,
                    container: container_id,
                });
            }
        }

        if !matches!(
            self.state,
            ConnectionState::Synchronized | ConnectionState::Ready
        ) {
            return Err(ClientError::NotConnected);
        }

        let update = self.reconciler.release(PlacementUpdate {
            entity_id,
            placement: Placement::new(container_id, position),
        });
        match self.connection.send_placement(&update).await {
            Ok(echo) => Ok(echo.unwrap_or(update)),
            Err(e) => {
                if self.connection.is_push() {
                    self.state = ConnectionState::Disconnected;
                }
                Err(e)
            }
        }
    }

    /// Push only: wait for one server event and reconcile it.
    ///
    /// Returns `None` when the connection is gone (or for polling clients).
    pub async fn next_remote(&mut self) -> Option<ServerMessage> {
        let Some(message) = self.connection.next_remote().await else {
            if self.connection.is_push() {
                self.state = ConnectionState::Disconnected;
            }
            return None;
        };

        match &message {
            ServerMessage::PlacementChanged(update) => {
                self.reconciler.apply_one(update);
            }
            ServerMessage::StateReset(snapshot) | ServerMessage::InitialState(snapshot) => {
                self.reconciler.apply(snapshot);
            }
            ServerMessage::Error(err) => {
                log::warn!("Server rejected an update: {}", err.message);
            }
        }
        Some(message)
    }

    pub fn disconnect(&mut self) {
        self.connection.close();
        self.reconciler.cancel_drag();
        self.state = ConnectionState::Disconnected;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn presentation(&self) -> &P {
        self.reconciler.presentation()
    }

    pub fn reconciler(&self) -> &Reconciler<P> {
        &self.reconciler
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}
