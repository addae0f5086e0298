//! `GET /stream/{user_id}`: opens an SSE stream and registers it.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{sse::Event, IntoResponse, Response, Sse},
    routing::get,
    Router,
};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::{ConnectionHandle, SseFrame};
use crate::server::state::{GuardedConnectionRegistry, ServerState};
use crate::server::ServerConfig;

#[derive(Debug, Deserialize)]
struct StreamQuery {
    /// Comma separated group ids.
    #[serde(default)]
    groups: Option<String>,
}

impl StreamQuery {
    fn group_ids(&self) -> Vec<&str> {
        self.groups
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .collect()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectedEvent<'a> {
    user_id: &'a str,
    timestamp: chrono::DateTime<Utc>,
}

/// Closes the connection when the response body is dropped, which happens
/// when the client goes away.
struct CloseOnDrop(ConnectionHandle);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        debug!("Stream of connection {} dropped", self.0.id());
        self.0.close();
    }
}

async fn open_stream(
    State(registry): State<GuardedConnectionRegistry>,
    State(config): State<ServerConfig>,
    Path(user_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return missing_user_id().await.into_response();
    }

    let (handle, receiver) = registry.new_connection(user_id);
    registry.add_user_connection(handle.clone()).await;
    let groups = query.group_ids();
    for group_id in &groups {
        registry.add_to_group(group_id, &handle).await;
    }
    info!(
        "SSE connection {} opened for user {} (groups: {:?})",
        handle.id(),
        user_id,
        groups
    );

    let connected = ConnectedEvent {
        user_id,
        timestamp: Utc::now(),
    };
    match SseFrame::event("connected", &connected) {
        Ok(frame) => {
            if let Err(err) = handle.write(frame) {
                warn!("Could not greet connection {}: {:?}", handle.id(), err);
            }
        }
        Err(err) => error!("Failed to encode connected event: {}", err),
    }

    registry.supervise(handle.clone(), config.heartbeat_interval);

    let closed = handle.closed_token();
    let guard = CloseOnDrop(handle);
    let stream = ReceiverStream::new(receiver)
        .map(move |frame| {
            let _ = &guard;
            Ok::<Event, Infallible>(frame.into_event())
        })
        .take_until(closed.cancelled_owned());

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

async fn missing_user_id() -> impl IntoResponse {
    warn!("Stream requested without a user id");
    (StatusCode::BAD_REQUEST, "userId is required")
}

pub fn make_stream_routes() -> Router<ServerState> {
    Router::new()
        .route("/stream", get(missing_user_id))
        .route("/stream/", get(missing_user_id))
        .route("/stream/{user_id}", get(open_stream))
}
