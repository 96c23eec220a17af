//! Live report server
//!
//! Routes:
//! - `GET /events`: server-sent events, one JSON `{type, data}` object per
//!   event, starting with `init`
//! - `GET /api/files`: the current snapshot of every file
//!
//! A stream ends when its client disconnects (the listener is removed on
//! drop), when the listener is dropped for falling behind, or when the
//! session is cancelled.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::common::Result;
use crate::reporter::live::{FileSnapshot, ListenerId};
use crate::reporter::{Cache, Event};

#[derive(Clone)]
struct LiveState {
    cache: Arc<Cache>,
    cancel: CancellationToken,
}

/// Listener registration that removes itself when the stream is dropped
struct Subscription {
    cache: Arc<Cache>,
    id: ListenerId,
    rx: mpsc::Receiver<Event>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cache.unsubscribe(self.id);
    }
}

fn to_sse(event: &Event) -> SseEvent {
    SseEvent::default().json_data(event).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to encode event");
        SseEvent::default().comment("encoding error")
    })
}

async fn events(
    State(state): State<LiveState>,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let (id, rx) = state.cache.subscribe();
    tracing::info!(listener = id, "Live client connected");

    let subscription = Subscription {
        cache: Arc::clone(&state.cache),
        id,
        rx,
    };
    let cancel = state.cancel.clone();
    let stream = stream::unfold(subscription, |mut sub| async move {
        let event = sub.rx.recv().await?;
        Some((Ok::<_, Infallible>(to_sse(&event)), sub))
    })
    .take_until(async move { cancel.cancelled().await });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn files(State(state): State<LiveState>) -> Json<BTreeMap<String, FileSnapshot>> {
    Json(state.cache.snapshot())
}

/// Build the router over `cache`
pub fn router(cache: Arc<Cache>, cancel: CancellationToken) -> Router {
    Router::new()
        .route("/events", get(events))
        .route("/api/files", get(files))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(LiveState { cache, cancel })
}

/// Bind the live server address
pub async fn bind(addr: &str) -> Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Serve until `cancel` fires
pub async fn serve(listener: TcpListener, cache: Arc<Cache>, cancel: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Live report server listening");
    }
    let app = router(cache, cancel.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::debug!("Live report server stopped");
    Ok(())
}
