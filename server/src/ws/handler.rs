use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::Response,
};
use std::net::SocketAddr;
use tracing::Instrument;

use crate::state::AppState;
use crate::ws::actor;

/// GET / and GET /ws
/// WebSocket upgrade endpoint. Identity is negotiated in-band: the first
/// frame must be a startup message (see `ws::handshake`).
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    tracing::debug!(peer = %peer, "WebSocket upgrade requested");

    let span = tracing::info_span!("connection", peer = %peer);
    ws.on_upgrade(move |socket| actor::run_connection(socket, state).instrument(span))
}
