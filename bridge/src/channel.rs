//! Server-to-client push channel: one `manifest` event, then `ping` events
//! until the client goes away.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_stream::wrappers::ReceiverStream;

use crate::manifest::Manifest;

const CHANNEL_CAPACITY: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Manifest(Arc<Manifest>),
    Ping { ts: i64 },
}

impl ChannelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::Manifest(_) => "manifest",
            ChannelEvent::Ping { .. } => "ping",
        }
    }

    pub fn into_sse(self) -> Result<Event, Infallible> {
        let event = Event::default().event(self.name());
        Ok(match self {
            ChannelEvent::Manifest(manifest) => match event.json_data(manifest.as_ref()) {
                Ok(event) => event,
                Err(err) => {
                    tracing::error!(event = "manifest_encode_failed", error = %err, "manifest not serializable");
                    Event::default().event("manifest").data("{}")
                }
            },
            ChannelEvent::Ping { ts } => event.data(json!({ "ts": ts }).to_string()),
        })
    }
}

/// Spawn the emission task for one connection.
///
/// The task stops as soon as the returned stream is dropped; nothing is
/// written after that.
pub fn open(
    manifest: Arc<Manifest>,
    ping_interval: Duration,
    connection_id: Option<String>,
) -> (ReceiverStream<ChannelEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        tracing::info!(event = "channel_opened", connection_id = ?connection_id, "stream opened");
        if tx.send(ChannelEvent::Manifest(manifest)).await.is_err() {
            tracing::info!(event = "channel_closed", connection_id = ?connection_id, pings = 0, "stream closed");
            return;
        }

        let mut ticker = interval_at(Instant::now() + ping_interval, ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_ts = i64::MIN;
        let mut pings: u64 = 0;

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {
                    // Wall clock may step backwards; timestamps must not.
                    let ts = Utc::now().timestamp().max(last_ts);
                    last_ts = ts;
                    if tx.send(ChannelEvent::Ping { ts }).await.is_err() {
                        break;
                    }
                    pings += 1;
                }
            }
        }
        tracing::info!(event = "channel_closed", connection_id = ?connection_id, pings, "stream closed");
    });

    (ReceiverStream::new(rx), handle)
}
