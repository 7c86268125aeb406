//! Streaming chat endpoint.
//!
//! Flow: client POST -> completion provider (SSE) -> deltas forwarded as
//! `data:` events -> full reply ad-processed -> `event: done` carrying the
//! linked HTML. Analytics writes around the turn are best-effort.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::ads::SessionContext;
use crate::api::ErrorResponse;
use crate::completion::{CompletionChunk, PromptMessage, TokenUsage};
use crate::history::Role;
use crate::metrics::{self, StreamGuard};
use crate::shared_state::AppState;
use crate::store::ActiveKeyword;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<PromptMessage>,
    pub session_id: Option<String>,
}

/// Payload of the final `done` event.
#[derive(Debug, Serialize)]
pub struct ChatDone {
    pub session_id: String,
    pub content: String,
    pub html: String,
    pub keywords: Vec<ActiveKeyword>,
    pub usage: TokenUsage,
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message.to_string() })).into_response()
}

/// POST /api/chat
pub async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> Response {
    let Some(last) = req.messages.last() else {
        return reject(StatusCode::BAD_REQUEST, "Messages array cannot be empty");
    };
    if last.role != Role::User || last.content.trim().is_empty() {
        return reject(StatusCode::BAD_REQUEST, "The last message must be a non-empty user message");
    }

    let turn = state.counters.inc_chat_turns();
    let session_id = req
        .session_id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!("Chat turn #{} for session {}", turn, session_id);

    let query = last.content.clone();
    let sid = session_id.clone();
    state.record_in_background("search", move |db| db.analytics.record_search(&sid, &query));

    let completion_stream = match state.completion.stream_chat(&req.messages).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("Failed to start completion for session {}: {}", session_id, e);
            return reject(e.status_code(), e.user_message());
        }
    };

    let prompt_chars = state.config.system_instruction.len()
        + req.messages.iter().map(|m| m.content.len()).sum::<usize>();

    let output_stream = async_stream::stream! {
        let _guard = StreamGuard::new();
        let mut full_response = String::new();
        let mut usage: Option<TokenUsage> = None;
        let mut failed = false;

        futures_util::pin_mut!(completion_stream);
        while let Some(item) = completion_stream.next().await {
            match item {
                Ok(CompletionChunk::Delta(text)) => {
                    full_response.push_str(&text);
                    yield Ok::<_, Infallible>(Event::default().data(json!({ "content": text }).to_string()));
                }
                Ok(CompletionChunk::Usage(reported)) => usage = Some(reported),
                Err(e) => {
                    error!("Completion stream failed for session {}: {}", session_id, e);
                    yield Ok(Event::default()
                        .event("error")
                        .data(json!({ "error": e.user_message() }).to_string()));
                    failed = true;
                    break;
                }
            }
        }

        if !failed {
            let ctx = SessionContext::for_session(session_id.clone());
            let processed = state.ad_processor.process_with_matches(&full_response, Some(&ctx)).await;
            let usage = usage.unwrap_or_else(|| TokenUsage::estimate(prompt_chars, full_response.len()));

            record_turn(&state, &session_id, &processed.matched, usage);

            let done = ChatDone {
                session_id: session_id.clone(),
                content: full_response,
                html: processed.content,
                keywords: processed.matched,
                usage,
            };
            match serde_json::to_string(&done) {
                Ok(payload) => yield Ok(Event::default().event("done").data(payload)),
                Err(e) => error!("Failed to encode done event: {}", e),
            }
            debug!("Chat turn finished for session {}", session_id);
        }
    };

    Sse::new(output_stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

fn record_turn(state: &AppState, session_id: &str, matched: &[ActiveKeyword], usage: TokenUsage) {
    if !matched.is_empty() {
        metrics::inc_ad_impressions(matched.len() as u64);
        let sid = session_id.to_string();
        let matched = matched.to_vec();
        state.record_in_background("impressions", move |db| {
            for keyword in &matched {
                db.analytics.record_impression(&sid, Some(keyword.id), &keyword.keyword)?;
            }
            Ok(())
        });
    }

    let sid = session_id.to_string();
    let model = state.completion.model().to_string();
    state.record_in_background("token usage", move |db| {
        db.analytics
            .record_token_usage(&sid, &model, usage.prompt_tokens, usage.completion_tokens)
    });
}
