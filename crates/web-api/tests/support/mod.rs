use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{ChatService, ChatServiceDependencies, ConnectionRegistry, HistoryLimits, SystemClock};
use domain::{RoomId, UserId};
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use infrastructure::ChatStorage;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{net::TcpListener, net::TcpStream, sync::oneshot, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, JwtConfig, JwtService};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 跑在临时端口上的完整服务，存储用内存实现
pub struct TestServer {
    pub addr: SocketAddr,
    pub http: Client,
    pub jwt: Arc<JwtService>,
    pub registry: Arc<ConnectionRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let storage = ChatStorage::in_memory();
        let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
            rooms: storage.rooms,
            membership: storage.membership,
            messages: storage.messages,
            receipts: storage.receipts,
            clock: Arc::new(SystemClock),
            limits: HistoryLimits::default(),
        }));
        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "integration-test-secret-with-32-plus-chars".to_string(),
            expiration_hours: 1,
        }));
        let registry = Arc::new(ConnectionRegistry::new());
        let state = AppState::new(chat_service, registry.clone(), jwt.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            http: Client::new(),
            jwt,
            registry,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn token(&self, user_id: UserId) -> String {
        self.jwt.generate_token(user_id).expect("token")
    }

    pub async fn direct_room(&self, a: UserId, b: UserId) -> RoomId {
        let room = self
            .http
            .post(format!("http://{}/api/v1/chat/direct", self.addr))
            .bearer_auth(self.token(a))
            .json(&json!({ "userId2": b }))
            .send()
            .await
            .expect("create room")
            .json::<Value>()
            .await
            .expect("room json");
        room["id"].as_str().expect("room id").parse().expect("uuid")
    }

    pub async fn connect(&self, token: Option<&str>) -> WsClient {
        let url = match token {
            Some(token) => format!("ws://{}/api/v1/ws?token={}", self.addr, token),
            None => format!("ws://{}/api/v1/ws", self.addr),
        };
        let (socket, _) = connect_async(url).await.expect("websocket connect");
        let (sink, stream) = socket.split();
        WsClient { sink, stream }
    }

    /// 等待注册表连接数达到预期
    pub async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..50 {
            if self.registry.connected_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {expected} connections, found {}",
            self.registry.connected_count().await
        );
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub struct WsClient {
    sink: futures_util::stream::SplitSink<Socket, Message>,
    stream: SplitStream<Socket>,
}

impl WsClient {
    pub async fn send(&mut self, frame: Value) {
        self.send_raw(&frame.to_string()).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.sink
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("send frame");
    }

    /// 下一个 JSON 文本帧；两秒内没有则失败
    pub async fn next(&mut self) -> Value {
        loop {
            let message = timeout(Duration::from_secs(2), self.stream.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream closed")
                .expect("websocket error");
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).expect("json frame");
            }
        }
    }

    /// 跳过其它帧，直到出现指定类型
    pub async fn next_of(&mut self, kind: &str) -> Value {
        loop {
            let frame = self.next().await;
            if frame["type"] == kind {
                return frame;
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}
