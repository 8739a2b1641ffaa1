//! Tabletop server: one placement store behind both transport adapters.
//!
//! Binds the HTTP adapter and the WebSocket push adapter from
//! `TABLETOP_*` environment variables and serves until either fails or
//! Ctrl-C arrives. Set `RUST_LOG` to change verbosity (default `info`).

use log::{error, info};
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

use tabletop_core::{deal, Snapshot};
use tabletop_sync::{PlacementStore, ServerConfig, SyncHub, SyncServer};

type BoxError = Box<dyn Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    info!("Starting tabletop server with {config:?}");

    let initial = if config.deal_on_start {
        deal(&mut rand::thread_rng())
    } else {
        Snapshot::new()
    };
    info!("Table seeded with {} cards", initial.len());

    let hub = Arc::new(SyncHub::new(
        PlacementStore::with_snapshot(initial),
        config.outbox_capacity,
    ));

    let http_listener = TcpListener::bind(&config.http_addr).await?;
    let push_listener = TcpListener::bind(&config.push_addr).await?;
    let push_server = SyncServer::new(config, hub.clone());

    tokio::select! {
        result = tabletop_sync::http::serve(http_listener, hub) => {
            if let Err(e) = &result {
                error!("HTTP adapter stopped: {e}");
            }
            result?;
        }
        result = push_server.serve(push_listener) => {
            if let Err(e) = &result {
                error!("Push adapter stopped: {e}");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
