//! Live notification feed.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::get,
};
use serde::Serialize;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::debug;

use eventline_events::DomainEvent;

use crate::hub::BroadcastHub;

pub fn router() -> Router {
    Router::new()
        .route("/stream", get(stream))
        .route("/clients", get(clients))
}

#[derive(Debug, Serialize)]
struct ClientCount {
    clients: usize,
}

/// GET /notifications/stream
///
/// One SSE event per notification: the event name is the notification type,
/// the data is the notification as JSON. Clients that fall behind skip ahead.
pub async fn stream(Extension(hub): Extension<Arc<BroadcastHub>>) -> Response {
    let Some(rx) = hub.subscribe() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    debug!(clients = hub.client_count(), "notification client connected");

    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(event) => Some(Ok::<_, Infallible>(sse_event(&event))),
        Err(lagged) => {
            debug!(error = %lagged, "notification client lagging");
            None
        }
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

/// SSE frame for one notification.
///
/// SSE field values cannot span lines, so a type containing CR or LF is sent
/// as an unnamed event; the JSON data still carries it.
fn sse_event(event: &DomainEvent) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    let frame = SseEvent::default().data(data);
    if event.event_type().contains(['\r', '\n']) {
        frame
    } else {
        frame.event(event.event_type())
    }
}

/// GET /notifications/clients
pub async fn clients(Extension(hub): Extension<Arc<BroadcastHub>>) -> impl IntoResponse {
    Json(ClientCount {
        clients: hub.client_count(),
    })
}
