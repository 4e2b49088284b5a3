use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use axum_extra::extract::WithRejection;
use tracing::debug;

use quest_types::api::{
    Claims, CountResponse, CreateSessionRequest, ListResponse, MessageResponse, MessagesQuery,
    MutualFollowQuery, MutualFollowResponse, SendMessageRequest, SessionResponse,
};
use quest_types::events::{RealtimeEvent, extra_to_string};
use quest_types::models::{ChatMessage, ChatSession, ContentType};

use crate::AppState;
use crate::error::ApiError;

/// POST /chat/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<CreateSessionRequest>, ApiError>,
) -> Result<Json<SessionResponse>, ApiError> {
    let target = req
        .target_user_id
        .ok_or_else(|| ApiError::bad_request("targetUserId is required"))?;

    let chat = state.chat().clone();
    let session = state
        .blocking(move || chat.get_or_create_session(claims.sub, target))
        .await?;
    Ok(Json(SessionResponse {
        success: true,
        session,
    }))
}

/// GET /chat/sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ListResponse<ChatSession>>, ApiError> {
    let chat = state.chat().clone();
    let list = state.blocking(move || chat.list_sessions(claims.sub)).await?;
    Ok(Json(ListResponse {
        success: true,
        list,
    }))
}

/// GET /chat/messages
pub async fn get_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Query(query), _): WithRejection<Query<MessagesQuery>, ApiError>,
) -> Result<Json<ListResponse<ChatMessage>>, ApiError> {
    let chat = state.chat().clone();
    let list = state
        .blocking(move || chat.get_messages(query.session_id, claims.sub, query.page, query.page_size))
        .await?;
    Ok(Json(ListResponse {
        success: true,
        list,
    }))
}

/// POST /chat/messages. The stored message is also pushed to the
/// receiver's live connections.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> Result<Json<MessageResponse>, ApiError> {
    let receiver_id = req
        .receiver_id
        .ok_or_else(|| ApiError::bad_request("receiverId is required"))?;
    let content = req.content.unwrap_or_default();
    if content.trim().is_empty() {
        return Err(ApiError::bad_request("content is required"));
    }
    let content_type = ContentType::from_code(req.content_type.unwrap_or(0))
        .ok_or_else(|| ApiError::bad_request("unknown contentType"))?;
    let extra = extra_to_string(req.extra);

    let chat = state.chat().clone();
    let sender_id = claims.sub;
    let message = state
        .blocking(move || {
            chat.send_message(sender_id, receiver_id, content_type, &content, extra.as_deref())
        })
        .await?;

    let reached = state
        .gateway
        .registry
        .deliver(receiver_id, RealtimeEvent::Chat {
            message: message.clone(),
        })
        .await;
    debug!("Message {} pushed to {} connections", message.id, reached);

    Ok(Json(MessageResponse {
        success: true,
        message,
    }))
}

/// POST /chat/sessions/{id}/read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Path(session_id), _): WithRejection<Path<i64>, ApiError>,
) -> Result<Json<CountResponse>, ApiError> {
    let chat = state.chat().clone();
    let count = state
        .blocking(move || chat.mark_read(session_id, claims.sub))
        .await?;
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}

/// GET /chat/mutual-follow
pub async fn mutual_follow(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Query(query), _): WithRejection<Query<MutualFollowQuery>, ApiError>,
) -> Result<Json<MutualFollowResponse>, ApiError> {
    let chat = state.chat().clone();
    let mutual = state
        .blocking(move || chat.is_mutual_follow(claims.sub, query.target_user_id))
        .await?;
    Ok(Json(MutualFollowResponse {
        success: true,
        mutual,
    }))
}
