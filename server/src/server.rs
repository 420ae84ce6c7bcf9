//! Listener loop and shutdown drain.

use axum::extract::ws::{CloseFrame, Message};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{sleep, Instant};

use crate::routes;
use crate::state::AppState;
use crate::ws::ConnectionRegistry;

/// Close code sent to every connection when the server stops.
pub const CLOSE_GOING_AWAY: u16 = 1001;

const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Serve HTTP and WebSocket traffic on `listener` until `shutdown` resolves.
///
/// Each accepted connection is handled on its own task; a failing connection
/// never reaches this loop. Listener I/O errors are returned to the caller.
/// On shutdown every admitted connection is sent a close frame and given up
/// to `grace` to finish its teardown.
pub async fn run<F>(
    listener: TcpListener,
    state: AppState,
    shutdown: F,
    grace: Duration,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = routes::build_router(state.clone());
    let registry = state.registry.clone();

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.await;
        let closing = close_all(&registry, CLOSE_GOING_AWAY, "Server shutting down");
        tracing::info!(connections = closing, "Shutdown requested, closing connections");
    })
    .await?;

    if !drain(&state.registry, grace).await {
        tracing::warn!(
            remaining = state.registry.len(),
            "Connections still open after shutdown grace period"
        );
    }
    Ok(())
}

/// Queue a close frame on every registered connection. Returns how many
/// connections accepted it.
pub fn close_all(registry: &ConnectionRegistry, code: u16, reason: &str) -> usize {
    registry
        .snapshot()
        .iter()
        .map(|record| {
            record.send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_owned().into(),
            })))
        })
        .filter(|sent| *sent)
        .count()
}

/// Wait until the registry is empty or `grace` elapses. True if it emptied.
pub async fn drain(registry: &ConnectionRegistry, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while !registry.is_empty() {
        if Instant::now() >= deadline {
            return false;
        }
        sleep(DRAIN_POLL).await;
    }
    true
}
