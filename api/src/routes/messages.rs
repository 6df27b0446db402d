use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use centavo_core::error::ApiError;
use centavo_core::model::{MessageReply, MessageRequest};

use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/messages", post(handle_message))
}

/// Handle one inbound chat message.
///
/// The messaging adapter calls this with the raw user text; the reply is
/// ready to render verbatim. Confirmation prompts are additionally pushed
/// through the notification sink for adapters that deliver asynchronously.
#[utoipa::path(
    post,
    path = "/v1/messages",
    request_body = MessageRequest,
    responses(
        (status = 200, description = "Message handled", body = MessageReply),
        (status = 400, description = "Validation failed", body = ApiError)
    ),
    tag = "messages"
)]
pub async fn handle_message(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageReply>, AppError> {
    if request.conversation_id.trim().is_empty() {
        return Err(AppError::Validation {
            message: "conversation_id must not be empty".to_string(),
            field: Some("conversation_id".to_string()),
            received: None,
            docs_hint: None,
        });
    }

    let reply = state.service.handle(request).await?;
    Ok(Json(reply))
}
