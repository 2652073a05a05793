use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::{Router, routing::get};
use tokio_stream::{Stream, StreamExt};

use crate::channel::{self, ChannelEvent};
use crate::extract::ConnectionId;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/sse", get(open_channel))
}

/// Streaming channel: `manifest` once, then `ping` every interval.
#[utoipa::path(
    get,
    path = "/sse",
    responses(
        (status = 200, description = "text/event-stream of manifest and ping events", content_type = "text/event-stream")
    ),
    tag = "mcp"
)]
pub async fn open_channel(
    State(state): State<AppState>,
    connection_id: ConnectionId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // The emission task watches the receiver; dropping the stream on
    // disconnect ends it, so the handle is not awaited here.
    let (events, _task) = channel::open(
        state.manifest.clone(),
        state.ping_interval,
        connection_id.0,
    );
    Sse::new(events.map(ChannelEvent::into_sse))
}
