//! 聊天子系统核心领域模型
//!
//! 包含聊天室、消息、已读回执等实体，以及持久化协作方（成员资格、消息存储）的接口定义。

pub mod chat_room;
pub mod errors;
pub mod message;
pub mod read_receipt;
pub mod repository;
pub mod value_objects;

pub use chat_room::{ChatRoom, RoomSummary, RoomType};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::{Message, MessageContent, MessageType, MessageWithSender, SenderProfile};
pub use read_receipt::ReadReceipt;
pub use repository::{
    ChatRoomStore, MessageStore, ReadReceiptStore, RepositoryResult, RoomMembership,
};
pub use value_objects::{MessageId, PitchId, RoomId, Timestamp, UserId};

#[cfg(feature = "testing")]
pub use repository::{MockChatRoomStore, MockMessageStore, MockReadReceiptStore, MockRoomMembership};
