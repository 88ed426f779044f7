//! Web API 层。
//!
//! 提供 Axum 路由：聊天 REST 接口、WebSocket 升级与健康检查，
//! 请求委托给应用层的 `ChatService` 与 `Dispatcher`。

mod auth;
mod error;
mod routes;
mod state;
mod websocket;

pub use auth::{AuthUser, Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
