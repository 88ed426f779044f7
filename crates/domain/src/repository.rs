//! 持久化协作方接口
//!
//! 聊天核心只依赖这些 trait，不关心具体存储。实现见 `infrastructure`
//! （PostgreSQL 与内存版本）。

use async_trait::async_trait;

use crate::chat_room::{ChatRoom, RoomSummary};
use crate::errors::RepositoryError;
use crate::message::{Message, MessageWithSender};
use crate::read_receipt::ReadReceipt;
use crate::value_objects::{MessageId, RoomId, Timestamp, UserId};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// 房间成员资格：回答“用户 U 是否是房间 R 的参与者”。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait RoomMembership: Send + Sync {
    async fn is_participant(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<bool>;

    async fn participants(&self, room_id: RoomId) -> RepositoryResult<Vec<UserId>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ChatRoomStore: Send + Sync {
    async fn create_room(&self, room: ChatRoom) -> RepositoryResult<ChatRoom>;

    /// 若已存在参与者恰为 candidate 两人的 DIRECT 房间则返回它，否则写入 candidate。
    /// 查找与写入必须是原子的。
    async fn find_or_create_direct_room(&self, candidate: ChatRoom) -> RepositoryResult<ChatRoom>;

    async fn find_room(&self, room_id: RoomId) -> RepositoryResult<Option<ChatRoom>>;

    /// 按 updated_at 倒序
    async fn list_rooms_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<RoomSummary>>;
}

/// 消息存储：持久化消息并返回带发送者资料的记录用于广播。
#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// 发送者不是房间参与者时返回 `RepositoryError::Conflict`
    async fn create_message(&self, message: Message) -> RepositoryResult<MessageWithSender>;

    async fn touch_room(&self, room_id: RoomId, at: Timestamp) -> RepositoryResult<()>;

    async fn find_message(&self, message_id: MessageId) -> RepositoryResult<Option<Message>>;

    async fn find_room_for_message(&self, message_id: MessageId)
        -> RepositoryResult<Option<RoomId>>;

    /// 按 created_at 倒序分页
    async fn list_messages(
        &self,
        room_id: RoomId,
        offset: u64,
        limit: u32,
    ) -> RepositoryResult<Vec<MessageWithSender>>;

    async fn count_messages(&self, room_id: RoomId) -> RepositoryResult<u64>;

    async fn delete_message(&self, message_id: MessageId) -> RepositoryResult<()>;

    /// 用户所在房间中、非本人发送且没有已读回执的消息数
    async fn unread_count(&self, user_id: UserId) -> RepositoryResult<u64>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ReadReceiptStore: Send + Sync {
    /// 幂等：重复标记只会刷新 read_at。消息不存在时返回 `RepositoryError::NotFound`。
    async fn upsert_read_receipt(&self, receipt: ReadReceipt) -> RepositoryResult<ReadReceipt>;

    async fn find_read_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<Option<ReadReceipt>>;
}
