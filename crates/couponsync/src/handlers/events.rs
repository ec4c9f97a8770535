//! SSE endpoint and client control endpoints of the notification hub.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use couponsync_core::entity::ALL_CHANNEL;

use crate::{
    handlers::AppError,
    notify::{ClientMessage, NotificationHub},
    state::AppState,
};

/// Query parameters for the SSE events endpoint.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Comma-separated channels (`stores`, `coupons`, `all`). Defaults to `all`.
    pub channels: Option<String>,
}

/// Body of the subscribe endpoint.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub channels: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeResponse {
    pub client_id: String,
    pub channels: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub client_id: String,
    pub timestamp: DateTime<Utc>,
}

fn parse_channels(raw: Option<&str>) -> Vec<String> {
    let channels: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    if channels.is_empty() {
        vec![ALL_CHANNEL.to_string()]
    } else {
        channels
    }
}

/// Removes the client from the hub when its stream is dropped.
struct ClientGuard {
    hub: Arc<NotificationHub>,
    client_id: String,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.hub.disconnect(&self.client_id);
    }
}

fn to_sse_event(message: &ClientMessage) -> Event {
    let data = serde_json::to_string(message).unwrap_or_default();
    let event = Event::default().event(message.event_name()).data(data);
    match message {
        ClientMessage::Change { version, .. } => event.id(version.to_string()),
        _ => event,
    }
}

/// SSE endpoint for change events (GET /api/events).
///
/// The first event is `subscribed`, carrying the client id used by the
/// heartbeat and subscribe endpoints.
pub async fn events_sse(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let channels = parse_channels(query.channels.as_deref());
    let (client_id, mut messages) = state.hub.connect(&channels)?;

    let mut shutdown_rx = state.subscribe_shutdown();
    let guard = ClientGuard {
        hub: Arc::clone(&state.hub),
        client_id,
    };

    let stream = async_stream::stream! {
        let _guard = guard;

        loop {
            tokio::select! {
                message = messages.recv() => {
                    match message {
                        Some(message) => yield Ok(to_sse_event(&message)),
                        None => break,
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("SSE session received shutdown signal");
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Client heartbeat (POST /api/events/{client_id}/heartbeat).
///
/// The acknowledgment is returned here and also pushed on the client's
/// stream.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<HeartbeatResponse>, AppError> {
    let timestamp = state.hub.heartbeat(&client_id)?;
    Ok(Json(HeartbeatResponse {
        client_id,
        timestamp,
    }))
}

/// Add channels to a connected client (POST /api/events/{client_id}/subscribe).
pub async fn subscribe(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(request): Json<SubscribeRequest>,
) -> Result<Json<SubscribeResponse>, AppError> {
    let channels = state.hub.subscribe(&client_id, &request.channels)?;
    Ok(Json(SubscribeResponse {
        client_id,
        channels,
    }))
}
