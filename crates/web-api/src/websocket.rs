//! WebSocket 连接处理
//!
//! 握手时 token 可选：校验失败或缺失时连接照常建立，只是未认证。
//! 每个连接一个读任务（逐帧 await 分发器）和一个写任务（排空出站通道）。

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use domain::UserId;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = query
        .token
        .as_deref()
        .filter(|token| !token.is_empty())
        .and_then(|token| match state.jwt_service.user_from_token(token) {
            Ok(user_id) => Some(user_id),
            Err(_) => {
                tracing::warn!("websocket token rejected, continuing unauthenticated");
                None
            }
        });

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Option<UserId>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection_id = state.registry.admit(Arc::new(tx), user_id).await;
    tracing::info!(connection_id = %connection_id, user_id = ?user_id, "websocket connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let dispatcher = state.dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => dispatcher.dispatch(connection_id, text.as_str()).await,
                Ok(Message::Binary(_)) => {
                    tracing::debug!(connection_id = %connection_id, "binary frame ignored");
                }
                Ok(Message::Close(_)) => break,
                // ping/pong 由 axum 处理
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(connection_id = %connection_id, error = %err, "websocket error");
                    break;
                }
            }
        }
    });

    // 读任务不中断：进行中的处理器照常完成
    tokio::select! {
        _ = &mut recv_task => {}
        _ = &mut send_task => {
            let _ = (&mut recv_task).await;
        }
    }
    send_task.abort();

    if let Some(closed) = state.registry.remove(connection_id).await {
        tracing::info!(
            connection_id = %connection_id,
            user_id = ?closed.user_id,
            room_id = ?closed.room_id,
            "websocket disconnected"
        );
    }
}
