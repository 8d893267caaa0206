//! Inbound webhook endpoint.
//!
//! Accepts the LINE-style event envelope on `POST /callback`, feeds each
//! text event through the dispatcher, and pushes the replies back out
//! through the message port. The endpoint always acknowledges with 200
//! once the envelope parses; per-turn failures become replies, not HTTP
//! errors, so the platform never retries a turn the user already saw.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use examline_core::traits::MessagePort;
use examline_core::Dispatcher;

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub port: Arc<dyn MessagePort>,
}

#[derive(Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    #[serde(default)]
    kind: String,
    #[serde(default)]
    source: Option<EventSource>,
    #[serde(default)]
    message: Option<EventMessage>,
}

#[derive(Deserialize)]
struct EventSource {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct EventMessage {
    #[serde(rename = "type")]
    #[serde(default)]
    kind: String,
    #[serde(default)]
    text: String,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/callback", post(callback))
        .with_state(state)
}

async fn callback(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<WebhookEnvelope>,
) -> StatusCode {
    for event in envelope.events {
        let Some(user_id) = event.source.and_then(|s| s.user_id) else {
            tracing::debug!("skipping event without a user id");
            continue;
        };
        let Some(message) = event.message else {
            continue;
        };
        if event.kind != "message" || message.kind != "text" {
            continue;
        }

        let replies = state.dispatcher.handle(&user_id, &message.text).await;
        for reply in replies {
            if let Err(e) = state.port.send(&reply.to, &reply.text).await {
                tracing::error!(to = %reply.to, error = %e, "failed to push reply");
            }
        }
    }
    StatusCode::OK
}
