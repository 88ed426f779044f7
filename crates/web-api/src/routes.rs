use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use application::{MessagePage, SendMessageRequest};
use domain::{
    ChatRoom, MessageId, MessageType, MessageWithSender, PitchId, RoomId, RoomSummary, UserId,
};

use crate::{auth::AuthUser, error::ApiError, state::AppState, websocket::websocket_upgrade};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirectRoomPayload {
    user_id2: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PitchRoomPayload {
    pitch_id: PitchId,
    investor_id: UserId,
}

#[derive(Debug, Deserialize)]
struct SendMessagePayload {
    content: String,
    #[serde(default, rename = "type", alias = "messageType")]
    message_type: MessageType,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/chat/direct", post(create_direct_room))
        .route("/chat/pitch-discussion", post(create_pitch_room))
        .route("/chat/rooms", get(list_rooms))
        .route("/chat/rooms/{room_id}", get(get_room))
        .route(
            "/chat/rooms/{room_id}/messages",
            get(get_messages).post(send_message),
        )
        .route("/chat/messages/{message_id}/read", post(mark_read))
        .route("/chat/messages/{message_id}/delete", post(delete_message))
        .route("/chat/unread-count", get(unread_count))
        .route("/ws", get(websocket_upgrade))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.registry.connected_count().await,
    }))
}

async fn create_direct_room(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<DirectRoomPayload>,
) -> Result<(StatusCode, Json<ChatRoom>), ApiError> {
    let room = state
        .chat_service
        .create_direct_room(user_id, payload.user_id2)
        .await?;

    Ok((StatusCode::CREATED, Json(room)))
}

async fn create_pitch_room(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<PitchRoomPayload>,
) -> Result<(StatusCode, Json<ChatRoom>), ApiError> {
    let room = state
        .chat_service
        .create_pitch_room(payload.pitch_id, user_id, payload.investor_id)
        .await?;

    Ok((StatusCode::CREATED, Json(room)))
}

async fn list_rooms(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    Ok(Json(state.chat_service.list_rooms(user_id).await?))
}

async fn get_room(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<RoomId>,
) -> Result<Json<ChatRoom>, ApiError> {
    Ok(Json(state.chat_service.get_room(room_id, user_id).await?))
}

async fn get_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<RoomId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MessagePage>, ApiError> {
    let page = state
        .chat_service
        .get_messages(room_id, user_id, query.page, query.limit)
        .await?;

    Ok(Json(page))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(room_id): Path<RoomId>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageWithSender>), ApiError> {
    let stored = state
        .chat_service
        .send_message(SendMessageRequest {
            room_id,
            sender_id: user_id,
            content: payload.content,
            message_type: payload.message_type,
        })
        .await?;
    state.dispatcher.publish_message(stored.clone()).await;

    Ok((StatusCode::CREATED, Json(stored)))
}

async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<MessageId>,
) -> Result<Json<Value>, ApiError> {
    let (receipt, room_id) = state.chat_service.mark_read(message_id, user_id).await?;
    state
        .dispatcher
        .publish_read_receipt(room_id, &receipt)
        .await;

    Ok(Json(json!({ "message": "Message marked as read" })))
}

async fn unread_count(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Value>, ApiError> {
    let count = state.chat_service.unread_count(user_id).await?;
    Ok(Json(json!({ "unreadCount": count })))
}

async fn delete_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<MessageId>,
) -> Result<Json<Value>, ApiError> {
    state
        .chat_service
        .delete_message(message_id, user_id)
        .await?;

    Ok(Json(json!({ "message": "Message deleted successfully" })))
}
