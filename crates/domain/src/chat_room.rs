use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::message::MessageWithSender;
use crate::value_objects::{PitchId, RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    /// 两人私聊，不关联 pitch
    Direct,
    /// 围绕某个 pitch 的讨论
    PitchDiscussion,
}

impl RoomType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomType::Direct => "DIRECT",
            RoomType::PitchDiscussion => "PITCH_DISCUSSION",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "DIRECT" => Ok(RoomType::Direct),
            "PITCH_DISCUSSION" => Ok(RoomType::PitchDiscussion),
            other => Err(DomainError::invalid_argument(
                "room_type",
                format!("unknown room type {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: RoomId,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub pitch_id: Option<PitchId>,
    pub participants: Vec<UserId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ChatRoom {
    pub fn new_direct(
        id: RoomId,
        first: UserId,
        second: UserId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if first == second {
            return Err(DomainError::invalid_argument(
                "participants",
                "a direct room needs two distinct users",
            ));
        }
        Ok(Self {
            id,
            room_type: RoomType::Direct,
            pitch_id: None,
            participants: vec![first, second],
            created_at: now,
            updated_at: now,
        })
    }

    pub fn new_pitch_discussion(
        id: RoomId,
        pitch_id: PitchId,
        entrepreneur_id: UserId,
        investor_id: UserId,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        if entrepreneur_id == investor_id {
            return Err(DomainError::invalid_argument(
                "participants",
                "entrepreneur and investor must differ",
            ));
        }
        Ok(Self {
            id,
            room_type: RoomType::PitchDiscussion,
            pitch_id: Some(pitch_id),
            participants: vec![entrepreneur_id, investor_id],
            created_at: now,
            updated_at: now,
        })
    }

    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// 参与者集合恰好为 {first, second} 的 DIRECT 房间
    pub fn is_direct_between(&self, first: UserId, second: UserId) -> bool {
        self.room_type == RoomType::Direct
            && self.participants.len() == 2
            && self.has_participant(first)
            && self.has_participant(second)
    }

    pub fn touch(&mut self, now: Timestamp) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// 房间列表条目：房间本身、最近一条消息和消息总数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    #[serde(flatten)]
    pub room: ChatRoom,
    pub last_message: Option<MessageWithSender>,
    pub message_count: u64,
}
