//! Request/response adapter (HTTP + JSON).
//!
//! Stateless: every request performs exactly one hub operation. Routes are
//! mounted at the root and again under `/api`.
//!
//! | Route | Operation |
//! |---|---|
//! | `GET /state` | snapshot + last update time |
//! | `GET /cards` | snapshot cards only |
//! | `PUT /cards/{entity_id}` | set one placement, fan out to push peers |
//! | `POST /reset` | reset to empty or to the body's snapshot, broadcast |
//! | `POST /state` | replace the whole state, broadcast |
//! | `GET /stats` | hub counters |

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tabletop_core::{EntityId, Placement, PlacementUpdate, Snapshot};
use thiserror::Error;
use tokio::net::TcpListener;

use crate::hub::SyncHub;
use crate::protocol::ProtocolError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("malformed request body: {0}")]
    BadBody(String),
    #[error(transparent)]
    Rejected(#[from] ProtocolError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Rejected(ProtocolError::Serialization(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Rejected(_) => StatusCode::BAD_REQUEST,
        };
        log::warn!("HTTP {status}: {self}");
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadBody(rejection.body_text())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// `GET /state` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub cards: HashMap<EntityId, Placement>,
    pub last_update: DateTime<Utc>,
}

/// `POST /reset` acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetAck {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub placements_applied: u64,
    pub resets: u64,
    pub push_peers: usize,
    pub fanout_messages: u64,
    pub peers_pruned: u64,
    pub cards: usize,
}

/// Build the router over a shared hub.
pub fn router(hub: Arc<SyncHub>) -> Router {
    Router::new()
        .merge(routes())
        .nest("/api", routes())
        .with_state(hub)
}

fn routes() -> Router<Arc<SyncHub>> {
    Router::new()
        .route("/state", get(get_state).post(replace_state))
        .route("/cards", get(get_cards))
        .route("/cards/{entity_id}", put(put_card))
        .route("/reset", post(reset))
        .route("/stats", get(stats))
}

/// Serve the router on a bound listener.
pub async fn serve(listener: TcpListener, hub: Arc<SyncHub>) -> std::io::Result<()> {
    log::info!("HTTP adapter listening on {}", listener.local_addr()?);
    axum::serve(listener, router(hub)).await
}

async fn get_state(State(hub): State<Arc<SyncHub>>) -> Json<StateResponse> {
    let view = hub.view().await;
    Json(StateResponse {
        cards: view.snapshot.cards,
        last_update: view.last_update,
    })
}

async fn get_cards(State(hub): State<Arc<SyncHub>>) -> Json<HashMap<EntityId, Placement>> {
    Json(hub.snapshot().await.cards)
}

async fn put_card(
    State(hub): State<Arc<SyncHub>>,
    Path(entity_id): Path<String>,
    body: Result<Json<Placement>, JsonRejection>,
) -> Result<Json<PlacementUpdate>, ApiError> {
    let Json(placement) = body?;
    let update = PlacementUpdate {
        entity_id: EntityId::new(entity_id),
        placement,
    };
    let applied = hub.update_placement(None, update).await?;
    Ok(Json(applied))
}

/// Empty body resets to nothing; a JSON snapshot body resets to it.
async fn reset(State(hub): State<Arc<SyncHub>>, body: Bytes) -> Result<Json<ResetAck>, ApiError> {
    let snapshot = parse_optional_snapshot(&body)?;
    let snapshot = hub.reset(snapshot).await?;
    Ok(Json(ResetAck {
        success: true,
        message: format!("state reset ({} cards)", snapshot.len()),
    }))
}

async fn replace_state(
    State(hub): State<Arc<SyncHub>>,
    body: Result<Json<Snapshot>, JsonRejection>,
) -> Result<Json<StateResponse>, ApiError> {
    let Json(snapshot) = body?;
    hub.reset(Some(snapshot)).await?;
    Ok(get_state(State(hub)).await)
}

async fn stats(State(hub): State<Arc<SyncHub>>) -> Json<StatsResponse> {
    let stats = hub.stats().await;
    let cards = hub.store().len().await;
    Json(StatsResponse {
        placements_applied: stats.placements_applied,
        resets: stats.resets,
        push_peers: stats.broadcast.active_peers,
        fanout_messages: stats.broadcast.messages_sent,
        peers_pruned: stats.broadcast.peers_pruned,
        cards,
    })
}

fn parse_optional_snapshot(body: &[u8]) -> Result<Option<Snapshot>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::BadBody(e.to_string()))
}
