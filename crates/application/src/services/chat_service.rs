use std::sync::Arc;

use domain::{
    ChatRoom, ChatRoomStore, DomainError, Message, MessageContent, MessageId, MessageStore,
    MessageType, MessageWithSender, PitchId, ReadReceipt, ReadReceiptStore, RepositoryError,
    RoomId, RoomMembership, RoomSummary, UserId,
};

use crate::{clock::Clock, dto::MessagePage, error::ApplicationError};

/// 历史分页的默认与上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub message_type: MessageType,
}

pub struct ChatServiceDependencies {
    pub rooms: Arc<dyn ChatRoomStore>,
    pub membership: Arc<dyn RoomMembership>,
    pub messages: Arc<dyn MessageStore>,
    pub receipts: Arc<dyn ReadReceiptStore>,
    pub clock: Arc<dyn Clock>,
    pub limits: HistoryLimits,
}

pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    /// 同一对用户只会有一个 DIRECT 房间
    pub async fn create_direct_room(
        &self,
        user_id: UserId,
        other_id: UserId,
    ) -> Result<ChatRoom, ApplicationError> {
        let candidate =
            ChatRoom::new_direct(RoomId::generate(), user_id, other_id, self.deps.clock.now())?;
        let room = self.deps.rooms.find_or_create_direct_room(candidate).await?;
        tracing::info!(room_id = %room.id, user_id = %user_id, other_id = %other_id, "direct room ready");
        Ok(room)
    }

    pub async fn create_pitch_room(
        &self,
        pitch_id: PitchId,
        entrepreneur_id: UserId,
        investor_id: UserId,
    ) -> Result<ChatRoom, ApplicationError> {
        let room = ChatRoom::new_pitch_discussion(
            RoomId::generate(),
            pitch_id,
            entrepreneur_id,
            investor_id,
            self.deps.clock.now(),
        )?;
        let room = self.deps.rooms.create_room(room).await?;
        tracing::info!(room_id = %room.id, pitch_id = %pitch_id, "pitch discussion room created");
        Ok(room)
    }

    pub async fn list_rooms(&self, user_id: UserId) -> Result<Vec<RoomSummary>, ApplicationError> {
        Ok(self.deps.rooms.list_rooms_for_user(user_id).await?)
    }

    pub async fn get_room(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<ChatRoom, ApplicationError> {
        let room = self
            .deps
            .rooms
            .find_room(room_id)
            .await?
            .ok_or(DomainError::RoomNotFound)?;
        if !room.has_participant(user_id) {
            return Err(DomainError::UserNotInRoom.into());
        }
        Ok(room)
    }

    pub async fn is_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, ApplicationError> {
        Ok(self.deps.membership.is_participant(room_id, user_id).await?)
    }

    pub async fn participants(&self, room_id: RoomId) -> Result<Vec<UserId>, ApplicationError> {
        Ok(self.deps.membership.participants(room_id).await?)
    }

    /// 取最新的一页，页内按时间正序返回
    pub async fn get_messages(
        &self,
        room_id: RoomId,
        user_id: UserId,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<MessagePage, ApplicationError> {
        self.get_room(room_id, user_id).await?;

        let limits = self.deps.limits;
        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(limits.default_page_size)
            .clamp(1, limits.max_page_size.max(1));
        let offset = u64::from(page - 1) * u64::from(limit);

        let mut messages = self
            .deps
            .messages
            .list_messages(room_id, offset, limit)
            .await?;
        messages.reverse();
        let total = self.deps.messages.count_messages(room_id).await?;
        let has_more = offset + (messages.len() as u64) < total;

        Ok(MessagePage {
            messages,
            total,
            has_more,
        })
    }

    /// 先持久化再返回；调用方拿到结果后才广播
    pub async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<MessageWithSender, ApplicationError> {
        let content = MessageContent::new(request.content)?;
        if !self
            .deps
            .membership
            .is_participant(request.room_id, request.sender_id)
            .await?
        {
            return Err(DomainError::UserNotInRoom.into());
        }

        let now = self.deps.clock.now();
        let message = Message::new(
            MessageId::generate(),
            request.room_id,
            request.sender_id,
            content,
            request.message_type,
            now,
        );
        let stored = match self.deps.messages.create_message(message).await {
            Ok(stored) => stored,
            // 校验与写入之间成员被移除
            Err(RepositoryError::Conflict(_)) => return Err(DomainError::UserNotInRoom.into()),
            Err(err) => return Err(err.into()),
        };

        if let Err(err) = self.deps.messages.touch_room(request.room_id, now).await {
            tracing::warn!(room_id = %request.room_id, error = %err, "failed to touch room");
        }

        tracing::info!(
            room_id = %request.room_id,
            sender_id = %request.sender_id,
            message_id = %stored.message.id,
            "message stored"
        );
        Ok(stored)
    }

    /// 标记已读，返回回执及消息所在房间
    pub async fn mark_read(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<(ReadReceipt, RoomId), ApplicationError> {
        let room_id = self
            .deps
            .messages
            .find_room_for_message(message_id)
            .await?
            .ok_or(DomainError::MessageNotFound)?;
        if !self.deps.membership.is_participant(room_id, user_id).await? {
            return Err(DomainError::UserNotInRoom.into());
        }

        let receipt = ReadReceipt::new(message_id, user_id, self.deps.clock.now());
        let receipt = match self.deps.receipts.upsert_read_receipt(receipt).await {
            Ok(receipt) => receipt,
            Err(RepositoryError::NotFound) => return Err(DomainError::MessageNotFound.into()),
            Err(err) => return Err(err.into()),
        };
        Ok((receipt, room_id))
    }

    pub async fn unread_count(&self, user_id: UserId) -> Result<u64, ApplicationError> {
        Ok(self.deps.messages.unread_count(user_id).await?)
    }

    /// 只有发送者可以删除
    pub async fn delete_message(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<(), ApplicationError> {
        let message = self
            .deps
            .messages
            .find_message(message_id)
            .await?
            .ok_or(DomainError::MessageNotFound)?;
        if !message.is_sent_by(user_id) {
            return Err(DomainError::NotMessageSender.into());
        }

        match self.deps.messages.delete_message(message_id).await {
            Ok(()) => {}
            Err(RepositoryError::NotFound) => return Err(DomainError::MessageNotFound.into()),
            Err(err) => return Err(err.into()),
        }
        tracing::info!(message_id = %message_id, user_id = %user_id, "message deleted");
        Ok(())
    }
}
