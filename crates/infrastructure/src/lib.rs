//! 基础设施层实现。
//!
//! 提供聊天室、消息、已读回执的存储适配器（PostgreSQL 与内存版本），
//! 实现领域层定义的协作方接口。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod repository;

pub use builder::{ChatStorage, InfrastructureConfig, InfrastructureError};
pub use memory::InMemoryChatStore;
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgChatRoomRepository, PgMessageRepository, PgReadReceiptRepository,
};
