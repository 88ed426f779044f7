//! WebSocket 帧定义
//!
//! 入站帧是以 `type` 为标签的封闭枚举，在分发器边界一次性解码；
//! 任何 handler 只会看到结构合法的帧。

use domain::{MessageId, MessageType, MessageWithSender, RoomId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 发给客户端的错误原因
pub mod reasons {
    pub const INVALID_FORMAT: &str = "Invalid message format";
    pub const NOT_AUTHORIZED_TO_JOIN: &str = "Not authorized to join this room";
    pub const FAILED_TO_JOIN: &str = "Failed to join room";
    pub const AUTHENTICATION_REQUIRED: &str = "Authentication required to send messages";
    pub const NOT_AUTHORIZED_TO_SEND: &str = "Not authorized to send messages in this room";
    pub const FAILED_TO_SEND: &str = "Failed to send message";
    pub const SENDER_MISMATCH: &str = "Sender does not match authenticated user";
}

const KNOWN_TAGS: [&str; 5] = ["joinRoom", "leaveRoom", "sendMessage", "typing", "readReceipt"];

/// 客户端 → 服务端
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: RoomId,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: RoomId },
    /// `type` 已被帧标签占用，消息类型走 `messageType`
    #[serde(rename_all = "camelCase")]
    SendMessage {
        room_id: RoomId,
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        sender_id: Option<UserId>,
    },
    #[serde(rename_all = "camelCase")]
    Typing {
        room_id: RoomId,
        is_typing: bool,
        #[serde(default)]
        user_id: Option<UserId>,
    },
    #[serde(rename_all = "camelCase")]
    ReadReceipt { message_id: MessageId, user_id: UserId },
}

impl ClientFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::JoinRoom { .. } => "joinRoom",
            ClientFrame::LeaveRoom { .. } => "leaveRoom",
            ClientFrame::SendMessage { .. } => "sendMessage",
            ClientFrame::Typing { .. } => "typing",
            ClientFrame::ReadReceipt { .. } => "readReceipt",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 不是 JSON，或已知标签下字段不合法；回复错误帧
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// 缺少或未知的标签；只记录日志
    #[error("unknown frame type {0:?}")]
    UnknownType(Option<String>),
}

pub fn decode(text: &str) -> Result<ClientFrame, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|err| DecodeError::Malformed(err.to_string()))?;

    let tag = value
        .as_object()
        .and_then(|object| object.get("type"))
        .and_then(|tag| tag.as_str());
    match tag {
        Some(tag) if KNOWN_TAGS.contains(&tag) => {}
        other => return Err(DecodeError::UnknownType(other.map(str::to_owned))),
    }

    serde_json::from_value(value).map_err(|err| DecodeError::Malformed(err.to_string()))
}

/// 服务端 → 客户端
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    RoomLeft { room_id: RoomId },
    ReceiveMessage { payload: MessageWithSender },
    #[serde(rename_all = "camelCase")]
    Typing {
        room_id: RoomId,
        is_typing: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    #[serde(rename_all = "camelCase")]
    ReadReceipt { message_id: MessageId, user_id: UserId },
    UnreadCount { count: u64 },
    Error { message: String },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
