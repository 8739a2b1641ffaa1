//! # tabletop-sync: Real-time placement sync for a shared card table
//!
//! One authoritative placement store, reachable two ways: plain HTTP
//! requests and a WebSocket push channel. Every accepted change reaches
//! every other push peer; resets reach everyone.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   HTTP + JSON    ┌─────────────┐
//! │ SyncClient  │ ◄──────────────► │ http router │──┐
//! │ (polling)   │                  └─────────────┘  │   ┌────────────────┐
//! └─────────────┘                                   ├──►│ SyncHub        │
//! ┌─────────────┐   WebSocket      ┌─────────────┐  │   │ store + fanout │
//! │ SyncClient  │ ◄──────────────► │ SyncServer  │──┘   └───────┬────────┘
//! │ (push)      │   JSON frames    └─────────────┘              │
//! └──────┬──────┘                                     ┌─────────┴──────────┐
//!        ▼                                            │ ConnectionRegistry │
//! ┌─────────────┐                                     │ (peer outboxes)    │
//! │ Reconciler  │                                     └────────────────────┘
//! └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: push wire messages (tagged JSON)
//! - [`store`]: authoritative placements
//! - [`broadcast`]: peer registry with bounded outboxes
//! - [`hub`]: store and registry behind one write path
//! - [`server`]: WebSocket push adapter
//! - [`http`]: request/response adapter
//! - [`reconcile`]: client-side application of remote state
//! - [`client`]: push and polling clients

pub mod protocol;
pub mod store;
pub mod broadcast;
pub mod hub;
pub mod server;
pub mod http;
pub mod reconcile;
pub mod client;

// Re-exports for convenience
pub use protocol::{ClientMessage, ConnectionId, ErrorPayload, Frame, ProtocolError, ServerMessage};
pub use store::{PlacementStore, StateView, Table};
pub use broadcast::{Audience, BroadcastStats, ConnectionRegistry};
pub use hub::{HubStats, Joined, SyncHub};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use http::{router, ApiError, ResetAck, StateResponse, StatsResponse};
pub use reconcile::{Presentation, Reconciler, Tableau};
pub use client::{
    ClientError, Connection, ConnectionState, PollingConnection, PushConnection, SyncClient,
};
