//! 聊天服务单元测试
//!
//! 大部分用例跑在内存存储上；持久化失败用 mockall 注入。

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use domain::{
    ChatRoom, ChatRoomStore, DomainError, MessageId, MessageType, MockMessageStore, PitchId,
    RepositoryError, RoomId, Timestamp, UserId,
};
use infrastructure::InMemoryChatStore;

use crate::clock::Clock;
use crate::error::ApplicationError;
use crate::services::{ChatService, ChatServiceDependencies, HistoryLimits, SendMessageRequest};

/// 每次调用前进一秒，保证时间戳严格递增
struct StepClock(Mutex<Timestamp>);

impl StepClock {
    fn new() -> Self {
        Self(Mutex::new(Utc::now()))
    }
}

impl Clock for StepClock {
    fn now(&self) -> Timestamp {
        let mut now = self.0.lock().unwrap();
        *now += Duration::seconds(1);
        *now
    }
}

fn service_with(store: &InMemoryChatStore, limits: HistoryLimits) -> ChatService {
    let store = Arc::new(store.clone());
    ChatService::new(ChatServiceDependencies {
        rooms: store.clone(),
        membership: store.clone(),
        messages: store.clone(),
        receipts: store,
        clock: Arc::new(StepClock::new()),
        limits,
    })
}

fn service(store: &InMemoryChatStore) -> ChatService {
    service_with(store, HistoryLimits::default())
}

fn text(room_id: RoomId, sender_id: UserId, content: &str) -> SendMessageRequest {
    SendMessageRequest {
        room_id,
        sender_id,
        content: content.to_string(),
        message_type: MessageType::Text,
    }
}

#[tokio::test]
async fn direct_room_is_unique_per_pair() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let (x, y) = (UserId::generate(), UserId::generate());

    let first = chat.create_direct_room(x, y).await.unwrap();
    let again = chat.create_direct_room(y, x).await.unwrap();

    assert_eq!(first.id, again.id);
    assert_eq!(chat.list_rooms(x).await.unwrap().len(), 1);
}

#[tokio::test]
async fn direct_room_with_self_is_rejected() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let x = UserId::generate();

    let err = chat.create_direct_room(x, x).await.unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::InvalidArgument { .. })
    ));
}

#[tokio::test]
async fn pitch_rooms_are_always_created() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let (entrepreneur, investor) = (UserId::generate(), UserId::generate());
    let pitch = PitchId::generate();

    let first = chat
        .create_pitch_room(pitch, entrepreneur, investor)
        .await
        .unwrap();
    let second = chat
        .create_pitch_room(pitch, entrepreneur, investor)
        .await
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.pitch_id, Some(pitch));
}

#[tokio::test]
async fn get_room_distinguishes_missing_and_forbidden() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let (x, y, z) = (UserId::generate(), UserId::generate(), UserId::generate());
    let room = chat.create_direct_room(x, y).await.unwrap();

    assert!(chat.get_room(room.id, x).await.is_ok());
    assert!(matches!(
        chat.get_room(room.id, z).await,
        Err(ApplicationError::Domain(DomainError::UserNotInRoom))
    ));
    assert!(matches!(
        chat.get_room(RoomId::generate(), x).await,
        Err(ApplicationError::Domain(DomainError::RoomNotFound))
    ));
}

#[tokio::test]
async fn non_participant_cannot_send() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let (x, y, z) = (UserId::generate(), UserId::generate(), UserId::generate());
    let room = chat.create_direct_room(x, y).await.unwrap();

    let err = chat.send_message(text(room.id, z, "hi")).await.unwrap_err();

    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::UserNotInRoom)
    ));
    assert_eq!(chat.get_messages(room.id, x, None, None).await.unwrap().total, 0);
}

#[tokio::test]
async fn blank_content_is_rejected() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let (x, y) = (UserId::generate(), UserId::generate());
    let room = chat.create_direct_room(x, y).await.unwrap();

    let err = chat.send_message(text(room.id, x, "  ")).await.unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::InvalidArgument { .. })
    ));
}

#[tokio::test]
async fn sending_touches_room() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let (x, y) = (UserId::generate(), UserId::generate());
    let room = chat.create_direct_room(x, y).await.unwrap();

    let stored = chat.send_message(text(room.id, x, "hello")).await.unwrap();

    let touched = store.find_room(room.id).await.unwrap().unwrap();
    assert!(touched.updated_at > room.updated_at);
    assert_eq!(touched.updated_at, stored.message.created_at);
}

#[tokio::test]
async fn history_pages_are_newest_window_in_chronological_order() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let (x, y) = (UserId::generate(), UserId::generate());
    let room = chat.create_direct_room(x, y).await.unwrap();
    for i in 0..5 {
        chat.send_message(text(room.id, x, &format!("m{i}")))
            .await
            .unwrap();
    }

    let first = chat.get_messages(room.id, y, Some(1), Some(2)).await.unwrap();
    let contents: Vec<_> = first
        .messages
        .iter()
        .map(|m| m.message.content.as_str().to_string())
        .collect();
    assert_eq!(contents, vec!["m3", "m4"]);
    assert_eq!(first.total, 5);
    assert!(first.has_more);

    let last = chat.get_messages(room.id, y, Some(3), Some(2)).await.unwrap();
    assert_eq!(last.messages.len(), 1);
    assert_eq!(last.messages[0].message.content.as_str(), "m0");
    assert!(!last.has_more);
}

#[tokio::test]
async fn history_limit_is_clamped() {
    let store = InMemoryChatStore::new();
    let chat = service_with(
        &store,
        HistoryLimits {
            default_page_size: 2,
            max_page_size: 3,
        },
    );
    let (x, y) = (UserId::generate(), UserId::generate());
    let room = chat.create_direct_room(x, y).await.unwrap();
    for i in 0..5 {
        chat.send_message(text(room.id, x, &format!("m{i}")))
            .await
            .unwrap();
    }

    let defaulted = chat.get_messages(room.id, x, None, None).await.unwrap();
    assert_eq!(defaulted.messages.len(), 2);

    let clamped = chat.get_messages(room.id, x, Some(0), Some(500)).await.unwrap();
    assert_eq!(clamped.messages.len(), 3);

    let at_least_one = chat.get_messages(room.id, x, Some(1), Some(0)).await.unwrap();
    assert_eq!(at_least_one.messages.len(), 1);
}

#[tokio::test]
async fn history_requires_participation() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let (x, y) = (UserId::generate(), UserId::generate());
    let room = chat.create_direct_room(x, y).await.unwrap();

    let err = chat
        .get_messages(room.id, UserId::generate(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::UserNotInRoom)
    ));
}

#[tokio::test]
async fn read_receipts_are_idempotent() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let (x, y) = (UserId::generate(), UserId::generate());
    let room = chat.create_direct_room(x, y).await.unwrap();
    let stored = chat.send_message(text(room.id, x, "hello")).await.unwrap();
    assert_eq!(chat.unread_count(y).await.unwrap(), 1);

    let (first, receipt_room) = chat.mark_read(stored.message.id, y).await.unwrap();
    let (second, _) = chat.mark_read(stored.message.id, y).await.unwrap();

    assert_eq!(receipt_room, room.id);
    assert!(second.read_at > first.read_at);
    assert_eq!(chat.unread_count(y).await.unwrap(), 0);
}

#[tokio::test]
async fn read_receipt_for_unknown_message_fails() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);

    let err = chat
        .mark_read(MessageId::generate(), UserId::generate())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Domain(DomainError::MessageNotFound)
    ));
}

#[tokio::test]
async fn only_sender_may_delete() {
    let store = InMemoryChatStore::new();
    let chat = service(&store);
    let (x, y) = (UserId::generate(), UserId::generate());
    let room = chat.create_direct_room(x, y).await.unwrap();
    let stored = chat.send_message(text(room.id, x, "oops")).await.unwrap();

    assert!(matches!(
        chat.delete_message(stored.message.id, y).await,
        Err(ApplicationError::Domain(DomainError::NotMessageSender))
    ));
    chat.delete_message(stored.message.id, x).await.unwrap();
    assert!(matches!(
        chat.delete_message(stored.message.id, x).await,
        Err(ApplicationError::Domain(DomainError::MessageNotFound))
    ));
}

#[tokio::test]
async fn storage_failure_surfaces_as_repository_error() {
    let store = Arc::new(InMemoryChatStore::new());
    let (x, y) = (UserId::generate(), UserId::generate());
    let room = store
        .create_room(ChatRoom::new_direct(RoomId::generate(), x, y, Utc::now()).unwrap())
        .await
        .unwrap();

    let mut messages = MockMessageStore::new();
    messages
        .expect_create_message()
        .times(1)
        .returning(|_| Err(RepositoryError::storage("disk full")));
    messages.expect_touch_room().never();

    let chat = ChatService::new(ChatServiceDependencies {
        rooms: store.clone(),
        membership: store.clone(),
        messages: Arc::new(messages),
        receipts: store,
        clock: Arc::new(StepClock::new()),
        limits: HistoryLimits::default(),
    });

    let err = chat.send_message(text(room.id, x, "hello")).await.unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::Repository(RepositoryError::Storage { .. })
    ));
}
