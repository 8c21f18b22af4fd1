use std::{collections::HashMap, future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{
        Path, State,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{bootstrap, config::RelayConfig, hub::HubHandle, rooms::Rooms};

#[derive(Clone)]
struct AppState {
    rooms: Arc<HashMap<String, HubHandle>>,
    config: Arc<RelayConfig>,
}

/// Builds the HTTP surface: `GET /room/{name}` upgrades into that room.
pub fn router(rooms: &Rooms, config: Arc<RelayConfig>) -> Router {
    let state = AppState {
        rooms: Arc::new(rooms.handles()),
        config,
    };
    Router::new()
        .route("/room/{room}", get(join_room))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn join_room(
    Path(room): Path<String>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(hub) = state.rooms.get(&room).cloned() else {
        return (StatusCode::NOT_FOUND, format!("no such room: {room}")).into_response();
    };

    match ws {
        Ok(ws) => bootstrap::upgrade(ws, hub, Arc::clone(&state.config)),
        Err(rejection) => {
            debug!(room = %room, error = %rejection, "rejected non-websocket request");
            rejection.into_response()
        }
    }
}

pub struct RelayServer {
    listener: TcpListener,
    rooms: Rooms,
    config: Arc<RelayConfig>,
}

impl RelayServer {
    /// Starts a hub for each room name; connections are served once
    /// [`run_until`](Self::run_until) is awaited.
    pub fn new<I, S>(listener: TcpListener, config: RelayConfig, rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rooms = Rooms::start(rooms, &config);
        Self {
            listener,
            rooms,
            config: Arc::new(config),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn rooms(&self) -> &Rooms {
        &self.rooms
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let RelayServer {
            listener,
            rooms,
            config,
        } = self;

        let app = router(&rooms, config);
        let hubs: Vec<HubHandle> = rooms.handles().into_values().collect();
        // Hubs stop first so their outboxes close and every peer hangs up.
        let shutdown = async move {
            shutdown.await;
            info!("relay shutting down");
            for hub in &hubs {
                hub.shutdown();
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("relay server failed")?;

        rooms.shutdown().await;
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}
