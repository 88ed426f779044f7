//! 应用层实现。
//!
//! 连接注册表、广播器、帧协议与分发器构成实时传输；
//! `ChatService` 提供 REST 与 socket 共用的聊天用例。

pub mod broadcaster;
pub mod clock;
pub mod connection;
pub mod dispatcher;
pub mod dto;
pub mod error;
pub mod protocol;
pub mod services;

pub use broadcaster::Broadcaster;
pub use clock::{Clock, SystemClock};
pub use connection::{
    ConnectionError, ConnectionId, ConnectionRegistry, ConnectionSnapshot, Outbound, SendError,
};
pub use dispatcher::Dispatcher;
pub use dto::MessagePage;
pub use error::ApplicationError;
pub use protocol::{decode, reasons, ClientFrame, DecodeError, ServerFrame};
pub use services::{ChatService, ChatServiceDependencies, HistoryLimits, SendMessageRequest};
