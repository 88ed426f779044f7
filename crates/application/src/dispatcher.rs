//! 入站帧分发
//!
//! 每个连接的读任务对每一帧 await `dispatch`，因此同一连接的帧严格按序处理；
//! 不同连接之间可以交错。处理器的错误只回复给发起的连接，不会影响其他连接。

use std::sync::Arc;

use domain::{DomainError, MessageId, MessageType, MessageWithSender, ReadReceipt, RoomId, UserId};

use crate::{
    broadcaster::Broadcaster,
    connection::{ConnectionId, ConnectionRegistry},
    error::ApplicationError,
    protocol::{decode, reasons, ClientFrame, DecodeError, ServerFrame},
    services::{ChatService, SendMessageRequest},
};

/// 连接已认证为 X 时，帧内的 id 必须缺省或等于 X
#[derive(Debug, PartialEq, Eq)]
struct IdentityMismatch;

fn resolve_identity(
    bound: Option<UserId>,
    inline: Option<UserId>,
) -> Result<Option<UserId>, IdentityMismatch> {
    match (bound, inline) {
        (Some(bound), Some(inline)) if bound != inline => Err(IdentityMismatch),
        (Some(bound), _) => Ok(Some(bound)),
        (None, inline) => Ok(inline),
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    chat: Arc<ChatService>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
}

impl Dispatcher {
    pub fn new(
        chat: Arc<ChatService>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            chat,
            registry,
            broadcaster,
        }
    }

    pub async fn dispatch(&self, connection_id: ConnectionId, text: &str) {
        match decode(text) {
            Ok(frame) => {
                tracing::debug!(connection_id = %connection_id, frame = frame.kind(), "frame received");
                self.handle(connection_id, frame).await;
            }
            Err(DecodeError::UnknownType(tag)) => {
                tracing::warn!(connection_id = %connection_id, tag = ?tag, "unknown frame type dropped");
            }
            Err(DecodeError::Malformed(reason)) => {
                tracing::warn!(connection_id = %connection_id, reason = %reason, "malformed frame");
                self.reply_error(connection_id, reasons::INVALID_FORMAT).await;
            }
        }
    }

    async fn handle(&self, connection_id: ConnectionId, frame: ClientFrame) {
        match frame {
            ClientFrame::JoinRoom { room_id, user_id } => {
                self.join_room(connection_id, room_id, user_id).await
            }
            ClientFrame::LeaveRoom { room_id } => self.leave_room(connection_id, room_id).await,
            ClientFrame::SendMessage {
                room_id,
                content,
                message_type,
                sender_id,
            } => {
                self.send_message(connection_id, room_id, content, message_type, sender_id)
                    .await
            }
            ClientFrame::Typing {
                room_id,
                is_typing,
                user_id,
            } => self.typing(connection_id, room_id, is_typing, user_id).await,
            ClientFrame::ReadReceipt {
                message_id,
                user_id,
            } => self.read_receipt(connection_id, message_id, user_id).await,
        }
    }

    async fn reply(&self, connection_id: ConnectionId, frame: ServerFrame) {
        if !self.broadcaster.to_connection(connection_id, &frame).await {
            tracing::debug!(connection_id = %connection_id, "reply dropped, connection gone");
        }
    }

    async fn reply_error(&self, connection_id: ConnectionId, reason: &str) {
        self.reply(connection_id, ServerFrame::error(reason)).await;
    }

    async fn join_room(&self, connection_id: ConnectionId, room_id: RoomId, inline: Option<UserId>) {
        let Some(connection) = self.registry.snapshot(connection_id).await else {
            return;
        };
        let user_id = match resolve_identity(connection.user_id, inline) {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                self.reply_error(connection_id, reasons::NOT_AUTHORIZED_TO_JOIN)
                    .await;
                return;
            }
            Err(IdentityMismatch) => {
                self.reply_error(connection_id, reasons::SENDER_MISMATCH).await;
                return;
            }
        };

        match self.chat.is_participant(room_id, user_id).await {
            Ok(true) => {
                if self
                    .registry
                    .set_room(connection_id, Some(room_id))
                    .await
                    .is_err()
                {
                    return;
                }
                tracing::info!(connection_id = %connection_id, user_id = %user_id, room_id = %room_id, "joined room");
                self.reply(connection_id, ServerFrame::RoomJoined { room_id })
                    .await;
            }
            Ok(false) => {
                self.reply_error(connection_id, reasons::NOT_AUTHORIZED_TO_JOIN)
                    .await;
            }
            Err(err) => {
                tracing::error!(connection_id = %connection_id, room_id = %room_id, error = %err, "join failed");
                self.reply_error(connection_id, reasons::FAILED_TO_JOIN).await;
            }
        }
    }

    async fn leave_room(&self, connection_id: ConnectionId, room_id: RoomId) {
        if self.registry.clear_room_if(connection_id, room_id).await {
            tracing::info!(connection_id = %connection_id, room_id = %room_id, "left room");
            self.reply(connection_id, ServerFrame::RoomLeft { room_id })
                .await;
        }
    }

    async fn send_message(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        content: String,
        message_type: MessageType,
        inline: Option<UserId>,
    ) {
        let Some(connection) = self.registry.snapshot(connection_id).await else {
            return;
        };
        let sender_id = match resolve_identity(connection.user_id, inline) {
            Ok(Some(sender_id)) => sender_id,
            Ok(None) => {
                self.reply_error(connection_id, reasons::AUTHENTICATION_REQUIRED)
                    .await;
                return;
            }
            Err(IdentityMismatch) => {
                self.reply_error(connection_id, reasons::SENDER_MISMATCH).await;
                return;
            }
        };

        let request = SendMessageRequest {
            room_id,
            sender_id,
            content,
            message_type,
        };
        let stored = match self.chat.send_message(request).await {
            Ok(stored) => stored,
            Err(ApplicationError::Domain(DomainError::UserNotInRoom)) => {
                self.reply_error(connection_id, reasons::NOT_AUTHORIZED_TO_SEND)
                    .await;
                return;
            }
            Err(ApplicationError::Domain(DomainError::InvalidArgument { .. })) => {
                self.reply_error(connection_id, reasons::INVALID_FORMAT).await;
                return;
            }
            Err(err) => {
                tracing::error!(connection_id = %connection_id, room_id = %room_id, error = %err, "send failed");
                self.reply_error(connection_id, reasons::FAILED_TO_SEND).await;
                return;
            }
        };

        if connection.user_id.is_none() {
            self.bind_identity(connection_id, sender_id).await;
        }
        self.publish_message(stored).await;
    }

    /// 广播已持久化的消息，REST 发送的消息也经由这里推送
    pub async fn publish_message(&self, stored: MessageWithSender) {
        let room_id = stored.message.room_id;
        let sender_id = stored.message.sender_id;
        self.broadcaster
            .to_room(room_id, &ServerFrame::ReceiveMessage { payload: stored })
            .await;
        self.push_unread_counts(room_id, sender_id).await;
    }

    pub async fn publish_read_receipt(&self, room_id: RoomId, receipt: &ReadReceipt) {
        self.broadcaster
            .to_room(
                room_id,
                &ServerFrame::ReadReceipt {
                    message_id: receipt.message_id,
                    user_id: receipt.user_id,
                },
            )
            .await;
    }

    /// 给房间内其他在线参与者推送最新未读数
    async fn push_unread_counts(&self, room_id: RoomId, sender_id: UserId) {
        let participants = match self.chat.participants(room_id).await {
            Ok(participants) => participants,
            Err(err) => {
                tracing::warn!(room_id = %room_id, error = %err, "failed to load participants");
                return;
            }
        };

        for user_id in participants.into_iter().filter(|id| *id != sender_id) {
            if !self.registry.is_user_connected(user_id).await {
                continue;
            }
            match self.chat.unread_count(user_id).await {
                Ok(count) => {
                    self.broadcaster
                        .to_user(user_id, &ServerFrame::UnreadCount { count })
                        .await;
                }
                Err(err) => {
                    tracing::warn!(user_id = %user_id, error = %err, "failed to compute unread count");
                }
            }
        }
    }

    async fn typing(
        &self,
        connection_id: ConnectionId,
        room_id: RoomId,
        is_typing: bool,
        inline: Option<UserId>,
    ) {
        let Some(connection) = self.registry.snapshot(connection_id).await else {
            return;
        };
        if connection.room_id != Some(room_id) {
            tracing::debug!(connection_id = %connection_id, room_id = %room_id, "typing for unsubscribed room ignored");
            return;
        }
        let Ok(user_id) = resolve_identity(connection.user_id, inline) else {
            tracing::warn!(connection_id = %connection_id, "typing with mismatched user id ignored");
            return;
        };

        self.broadcaster
            .to_room(
                room_id,
                &ServerFrame::Typing {
                    room_id,
                    is_typing,
                    user_id,
                },
            )
            .await;
    }

    async fn read_receipt(&self, connection_id: ConnectionId, message_id: MessageId, user_id: UserId) {
        let Some(connection) = self.registry.snapshot(connection_id).await else {
            return;
        };
        if resolve_identity(connection.user_id, Some(user_id)).is_err() {
            tracing::warn!(connection_id = %connection_id, user_id = %user_id, "read receipt for another user ignored");
            return;
        }

        match self.chat.mark_read(message_id, user_id).await {
            Ok((receipt, room_id)) => {
                if connection.user_id.is_none() {
                    self.bind_identity(connection_id, user_id).await;
                }
                self.publish_read_receipt(room_id, &receipt).await;
            }
            Err(err) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    message_id = %message_id,
                    error = %err,
                    "read receipt failed"
                );
            }
        }
    }

    async fn bind_identity(&self, connection_id: ConnectionId, user_id: UserId) {
        match self.registry.attach_user(connection_id, user_id).await {
            Ok(_) => {
                tracing::debug!(connection_id = %connection_id, user_id = %user_id, "identity bound from frame")
            }
            Err(err) => {
                tracing::warn!(connection_id = %connection_id, error = %err, "identity not bound")
            }
        }
    }
}
