use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::ads::{ProcessedMessage, SessionContext};
use crate::api::{ApiError, ApiResult};
use crate::shared_state::AppState;

const MAX_BATCH: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub messages: Vec<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    pub messages: Vec<ProcessedMessage>,
}

/// Ad-process stored assistant messages, e.g. when a saved chat is reopened.
pub async fn process_messages(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> ApiResult<Json<ProcessResponse>> {
    if req.messages.len() > MAX_BATCH {
        return Err(ApiError::bad_request(format!("At most {} messages per request", MAX_BATCH)));
    }
    let ctx = req.session_id.map(SessionContext::for_session);
    let messages = state.ad_processor.process_messages(&req.messages, ctx.as_ref()).await;
    state.counters.add_processed_messages(messages.len());
    Ok(Json(ProcessResponse { messages }))
}
