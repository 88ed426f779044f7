use std::sync::Arc;

use application::{Broadcaster, ChatService, ConnectionRegistry, Dispatcher};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub dispatcher: Arc<Dispatcher>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    /// 注册表由调用方构建并注入，广播器与分发器共享它
    pub fn new(
        chat_service: Arc<ChatService>,
        registry: Arc<ConnectionRegistry>,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(registry.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            chat_service.clone(),
            registry.clone(),
            broadcaster.clone(),
        ));
        Self {
            chat_service,
            registry,
            broadcaster,
            dispatcher,
            jwt_service,
        }
    }
}
