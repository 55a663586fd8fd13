//! Chat endpoints: streamed replies and history.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::Json;
use futures_util::Stream;
use localchat_relay::{Conversation, RelayEvent, SamplingParams};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, warn};

use super::ApiError;
use crate::app::AppContext;

#[derive(Debug, Deserialize)]
pub(super) struct ChatRequest {
    message: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

/// Settles the reply when the SSE stream ends, including when the browser
/// disconnects halfway.
struct ReplyGuard {
    ctx: Arc<AppContext>,
    epoch: u64,
}

impl Drop for ReplyGuard {
    fn drop(&mut self) {
        self.ctx.settle_reply(self.epoch);
    }
}

fn history_event(conversation: &Conversation) -> Event {
    match Event::default().event("history").json_data(conversation) {
        Ok(event) => event,
        Err(e) => Event::default().event("error").data(e.to_string()),
    }
}

/// Append the message and stream the reply as `history` events, ending with
/// `done` or `error`.
pub(super) async fn chat(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let params = SamplingParams::new(
        request
            .temperature
            .unwrap_or(SamplingParams::DEFAULT_TEMPERATURE),
        request.max_tokens.unwrap_or(SamplingParams::DEFAULT_MAX_TOKENS),
    )
    .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;

    let (conversation, epoch) = ctx
        .begin_reply(request.message)
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    debug!("Relaying reply {} ({} turns)", epoch, conversation.len());
    let mut rx = ctx.relay().spawn(conversation, params);
    let guard = ReplyGuard {
        ctx: Arc::clone(&ctx),
        epoch,
    };

    let events = async_stream::stream! {
        let guard = guard;
        while let Some(event) = rx.recv().await {
            match event {
                RelayEvent::Snapshot(snapshot) => {
                    let event = history_event(&snapshot);
                    guard.ctx.record_snapshot(guard.epoch, snapshot);
                    yield Ok(event);
                }
                RelayEvent::Finished => {
                    yield Ok(Event::default().event("done").data("ok"));
                }
                RelayEvent::Failed(e) => {
                    warn!("Reply {} failed: {}", guard.epoch, e);
                    guard.ctx.settle_reply(guard.epoch);
                    yield Ok(history_event(&guard.ctx.history()));
                    yield Ok(Event::default().event("error").data(e.to_string()));
                }
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

pub(super) async fn history(State(ctx): State<Arc<AppContext>>) -> Json<Conversation> {
    Json(ctx.history())
}

pub(super) async fn clear_history(State(ctx): State<Arc<AppContext>>) -> Json<Conversation> {
    ctx.clear_history();
    Json(ctx.history())
}
