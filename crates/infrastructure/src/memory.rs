//! 内存版存储：开发与测试使用，同时实现全部四个存储接口。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    ChatRoom, ChatRoomStore, Message, MessageId, MessageStore, MessageWithSender, ReadReceipt,
    ReadReceiptStore, RepositoryError, RepositoryResult, RoomId, RoomMembership, RoomSummary,
    SenderProfile, Timestamp, UserId,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    rooms: HashMap<RoomId, ChatRoom>,
    messages: Vec<Message>,
    receipts: HashMap<(MessageId, UserId), ReadReceipt>,
    profiles: HashMap<UserId, SenderProfile>,
}

impl State {
    fn with_sender(&self, message: &Message) -> MessageWithSender {
        let sender = self
            .profiles
            .get(&message.sender_id)
            .cloned()
            .unwrap_or_else(|| SenderProfile::bare(message.sender_id));
        MessageWithSender {
            message: message.clone(),
            sender,
        }
    }

    /// 新的在前；同一时间戳时后写入的在前
    fn room_messages_newest_first(&self, room_id: RoomId) -> Vec<&Message> {
        let mut items: Vec<(usize, &Message)> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, message)| message.room_id == room_id)
            .collect();
        items.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        items.into_iter().map(|(_, message)| message).collect()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryChatStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记发送者资料，对应外部用户表中的一行
    pub async fn register_profile(&self, profile: SenderProfile) {
        self.state.write().await.profiles.insert(profile.id, profile);
    }
}

#[async_trait]
impl RoomMembership for InMemoryChatStore {
    async fn is_participant(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .rooms
            .get(&room_id)
            .is_some_and(|room| room.has_participant(user_id)))
    }

    async fn participants(&self, room_id: RoomId) -> RepositoryResult<Vec<UserId>> {
        let state = self.state.read().await;
        Ok(state
            .rooms
            .get(&room_id)
            .map(|room| room.participants.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChatRoomStore for InMemoryChatStore {
    async fn create_room(&self, room: ChatRoom) -> RepositoryResult<ChatRoom> {
        let mut state = self.state.write().await;
        if state.rooms.contains_key(&room.id) {
            return Err(RepositoryError::conflict(format!(
                "room {} already exists",
                room.id
            )));
        }
        state.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn find_or_create_direct_room(&self, candidate: ChatRoom) -> RepositoryResult<ChatRoom> {
        let (first, second) = match candidate.participants.as_slice() {
            [first, second] => (*first, *second),
            _ => {
                return Err(RepositoryError::conflict(
                    "direct room needs exactly two participants",
                ))
            }
        };

        // 写锁覆盖查找与写入
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .rooms
            .values()
            .find(|room| room.is_direct_between(first, second))
        {
            return Ok(existing.clone());
        }
        state.rooms.insert(candidate.id, candidate.clone());
        Ok(candidate)
    }

    async fn find_room(&self, room_id: RoomId) -> RepositoryResult<Option<ChatRoom>> {
        Ok(self.state.read().await.rooms.get(&room_id).cloned())
    }

    async fn list_rooms_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<RoomSummary>> {
        let state = self.state.read().await;
        let mut rooms: Vec<&ChatRoom> = state
            .rooms
            .values()
            .filter(|room| room.has_participant(user_id))
            .collect();
        rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        Ok(rooms
            .into_iter()
            .map(|room| {
                let messages = state.room_messages_newest_first(room.id);
                RoomSummary {
                    room: room.clone(),
                    last_message: messages.first().map(|message| state.with_sender(message)),
                    message_count: messages.len() as u64,
                }
            })
            .collect())
    }
}

#[async_trait]
impl MessageStore for InMemoryChatStore {
    async fn create_message(&self, message: Message) -> RepositoryResult<MessageWithSender> {
        let mut state = self.state.write().await;
        let allowed = state
            .rooms
            .get(&message.room_id)
            .is_some_and(|room| room.has_participant(message.sender_id));
        if !allowed {
            return Err(RepositoryError::conflict(
                "sender is not a participant of the room",
            ));
        }
        let stored = state.with_sender(&message);
        state.messages.push(message);
        Ok(stored)
    }

    async fn touch_room(&self, room_id: RoomId, at: Timestamp) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or(RepositoryError::NotFound)?;
        room.touch(at);
        Ok(())
    }

    async fn find_message(&self, message_id: MessageId) -> RepositoryResult<Option<Message>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .find(|message| message.id == message_id)
            .cloned())
    }

    async fn find_room_for_message(
        &self,
        message_id: MessageId,
    ) -> RepositoryResult<Option<RoomId>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .find(|message| message.id == message_id)
            .map(|message| message.room_id))
    }

    async fn list_messages(
        &self,
        room_id: RoomId,
        offset: u64,
        limit: u32,
    ) -> RepositoryResult<Vec<MessageWithSender>> {
        let state = self.state.read().await;
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(state
            .room_messages_newest_first(room_id)
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .map(|message| state.with_sender(message))
            .collect())
    }

    async fn count_messages(&self, room_id: RoomId) -> RepositoryResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|message| message.room_id == room_id)
            .count() as u64)
    }

    async fn delete_message(&self, message_id: MessageId) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        let before = state.messages.len();
        state.messages.retain(|message| message.id != message_id);
        if state.messages.len() == before {
            return Err(RepositoryError::NotFound);
        }
        state
            .receipts
            .retain(|(receipt_message, _), _| *receipt_message != message_id);
        Ok(())
    }

    async fn unread_count(&self, user_id: UserId) -> RepositoryResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .filter(|message| message.sender_id != user_id)
            .filter(|message| {
                state
                    .rooms
                    .get(&message.room_id)
                    .is_some_and(|room| room.has_participant(user_id))
            })
            .filter(|message| !state.receipts.contains_key(&(message.id, user_id)))
            .count() as u64)
    }
}

#[async_trait]
impl ReadReceiptStore for InMemoryChatStore {
    async fn upsert_read_receipt(&self, receipt: ReadReceipt) -> RepositoryResult<ReadReceipt> {
        let mut state = self.state.write().await;
        if !state
            .messages
            .iter()
            .any(|message| message.id == receipt.message_id)
        {
            return Err(RepositoryError::NotFound);
        }
        state
            .receipts
            .insert((receipt.message_id, receipt.user_id), receipt.clone());
        Ok(receipt)
    }

    async fn find_read_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<Option<ReadReceipt>> {
        Ok(self
            .state
            .read()
            .await
            .receipts
            .get(&(message_id, user_id))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use domain::{MessageContent, MessageType};

    fn direct_room(a: UserId, b: UserId, at: Timestamp) -> ChatRoom {
        ChatRoom::new_direct(RoomId::generate(), a, b, at).unwrap()
    }

    fn text(room: RoomId, sender: UserId, body: &str, at: Timestamp) -> Message {
        Message::new(
            MessageId::generate(),
            room,
            sender,
            MessageContent::new(body).unwrap(),
            MessageType::Text,
            at,
        )
    }

    #[tokio::test]
    async fn direct_room_is_reused_for_same_pair() {
        let store = InMemoryChatStore::new();
        let (a, b) = (UserId::generate(), UserId::generate());
        let now = Utc::now();

        let first = store
            .find_or_create_direct_room(direct_room(a, b, now))
            .await
            .unwrap();
        let second = store
            .find_or_create_direct_room(direct_room(b, a, now))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn non_participant_cannot_store_message() {
        let store = InMemoryChatStore::new();
        let (a, b, outsider) = (UserId::generate(), UserId::generate(), UserId::generate());
        let room = store
            .create_room(direct_room(a, b, Utc::now()))
            .await
            .unwrap();

        let err = store
            .create_message(text(room.id, outsider, "hi", Utc::now()))
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(store.count_messages(room.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn messages_page_newest_first_with_sender_profile() {
        let store = InMemoryChatStore::new();
        let (a, b) = (UserId::generate(), UserId::generate());
        store
            .register_profile(SenderProfile {
                id: a,
                email: "a@example.com".into(),
                first_name: "Ada".into(),
                last_name: "L".into(),
            })
            .await;
        let room = store
            .create_room(direct_room(a, b, Utc::now()))
            .await
            .unwrap();
        let base = Utc::now();
        for i in 0..3 {
            store
                .create_message(text(room.id, a, &format!("m{i}"), base + Duration::seconds(i)))
                .await
                .unwrap();
        }

        let page = store.list_messages(room.id, 0, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].message.content.as_str(), "m2");
        assert_eq!(page[1].message.content.as_str(), "m1");
        assert_eq!(page[0].sender.first_name, "Ada");

        let rest = store.list_messages(room.id, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].message.content.as_str(), "m0");
    }

    #[tokio::test]
    async fn unread_count_ignores_own_and_read_messages() {
        let store = InMemoryChatStore::new();
        let (a, b) = (UserId::generate(), UserId::generate());
        let room = store
            .create_room(direct_room(a, b, Utc::now()))
            .await
            .unwrap();
        let from_a = text(room.id, a, "one", Utc::now());
        let read_id = from_a.id;
        store.create_message(from_a).await.unwrap();
        store
            .create_message(text(room.id, a, "two", Utc::now()))
            .await
            .unwrap();
        store
            .create_message(text(room.id, b, "reply", Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.unread_count(b).await.unwrap(), 2);

        store
            .upsert_read_receipt(ReadReceipt::new(read_id, b, Utc::now()))
            .await
            .unwrap();
        assert_eq!(store.unread_count(b).await.unwrap(), 1);
        assert_eq!(store.unread_count(a).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn receipt_upsert_is_idempotent_and_requires_message() {
        let store = InMemoryChatStore::new();
        let (a, b) = (UserId::generate(), UserId::generate());
        let room = store
            .create_room(direct_room(a, b, Utc::now()))
            .await
            .unwrap();
        let message = text(room.id, a, "hello", Utc::now());
        let message_id = message.id;
        store.create_message(message).await.unwrap();

        let first_at = Utc::now();
        store
            .upsert_read_receipt(ReadReceipt::new(message_id, b, first_at))
            .await
            .unwrap();
        let later = first_at + Duration::seconds(10);
        store
            .upsert_read_receipt(ReadReceipt::new(message_id, b, later))
            .await
            .unwrap();

        let stored = store
            .find_read_receipt(message_id, b)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.read_at, later);

        let missing = store
            .upsert_read_receipt(ReadReceipt::new(MessageId::generate(), b, Utc::now()))
            .await;
        assert_eq!(missing, Err(RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn rooms_are_listed_by_recent_activity() {
        let store = InMemoryChatStore::new();
        let (a, b, c) = (UserId::generate(), UserId::generate(), UserId::generate());
        let base = Utc::now();
        let older = store.create_room(direct_room(a, b, base)).await.unwrap();
        let newer = store
            .create_room(direct_room(a, c, base + Duration::seconds(1)))
            .await
            .unwrap();

        let listed = store.list_rooms_for_user(a).await.unwrap();
        assert_eq!(listed[0].room.id, newer.id);

        store
            .touch_room(older.id, base + Duration::seconds(5))
            .await
            .unwrap();
        let listed = store.list_rooms_for_user(a).await.unwrap();
        assert_eq!(listed[0].room.id, older.id);
        assert_eq!(listed.len(), 2);
        assert!(store.list_rooms_for_user(UserId::generate()).await.unwrap().is_empty());
    }
}
