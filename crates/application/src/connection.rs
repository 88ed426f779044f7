//! 连接注册表
//!
//! 记录每条存活的 socket：出站通道、（可选的）用户身份、当前订阅的房间。
//! 注册表是显式实例，由 main 构建后注入，不使用全局状态。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use domain::{RoomId, UserId};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("outbound channel closed")]
    Closed,
}

/// 连接的出站半边
pub trait Outbound: Send + Sync {
    fn is_open(&self) -> bool;

    fn send(&self, frame: String) -> Result<(), SendError>;
}

impl Outbound for mpsc::UnboundedSender<String> {
    fn is_open(&self) -> bool {
        !self.is_closed()
    }

    fn send(&self, frame: String) -> Result<(), SendError> {
        mpsc::UnboundedSender::send(self, frame).map_err(|_| SendError::Closed)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection {0} is not registered")]
    NotFound(ConnectionId),
    #[error("connection is already bound to user {bound}")]
    IdentityConflict { bound: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub user_id: Option<UserId>,
    pub room_id: Option<RoomId>,
}

pub type Target = (ConnectionId, Arc<dyn Outbound>);

struct ConnectionEntry {
    outbound: Arc<dyn Outbound>,
    user_id: Option<UserId>,
    room_id: Option<RoomId>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 握手时登记连接；凭证校验失败时 `user_id` 为 None，之后仍可由帧内 id 绑定
    pub async fn admit(&self, outbound: Arc<dyn Outbound>, user_id: Option<UserId>) -> ConnectionId {
        let id = ConnectionId::generate();
        self.entries.write().await.insert(
            id,
            ConnectionEntry {
                outbound,
                user_id,
                room_id: None,
            },
        );
        tracing::debug!(connection_id = %id, user_id = ?user_id, "connection admitted");
        id
    }

    /// 只在传输关闭或出错时调用
    pub async fn remove(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        let removed = self.entries.write().await.remove(&id)?;
        Some(ConnectionSnapshot {
            id,
            user_id: removed.user_id,
            room_id: removed.room_id,
        })
    }

    /// 身份只能设置一次；重复设置相同的 id 视为成功
    pub async fn attach_user(
        &self,
        id: ConnectionId,
        user_id: UserId,
    ) -> Result<UserId, ConnectionError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&id).ok_or(ConnectionError::NotFound(id))?;
        match entry.user_id {
            Some(bound) if bound != user_id => Err(ConnectionError::IdentityConflict { bound }),
            Some(bound) => Ok(bound),
            None => {
                entry.user_id = Some(user_id);
                Ok(user_id)
            }
        }
    }

    pub async fn snapshot(&self, id: ConnectionId) -> Option<ConnectionSnapshot> {
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| ConnectionSnapshot {
                id,
                user_id: entry.user_id,
                room_id: entry.room_id,
            })
    }

    /// 一次只订阅一个房间，加入新房间会替换旧的
    pub async fn set_room(
        &self,
        id: ConnectionId,
        room_id: Option<RoomId>,
    ) -> Result<(), ConnectionError> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(&id).ok_or(ConnectionError::NotFound(id))?;
        entry.room_id = room_id;
        Ok(())
    }

    /// 当前订阅等于 `room_id` 时清除，返回是否清除
    pub async fn clear_room_if(&self, id: ConnectionId, room_id: RoomId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&id) {
            Some(entry) if entry.room_id == Some(room_id) => {
                entry.room_id = None;
                true
            }
            _ => false,
        }
    }

    /// 读锁下取快照，调用方在锁释放后再发送
    pub async fn room_targets(&self, room_id: RoomId) -> Vec<Target> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.room_id == Some(room_id))
            .map(|(id, entry)| (*id, entry.outbound.clone()))
            .collect()
    }

    pub async fn user_targets(&self, user_id: UserId) -> Vec<Target> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.user_id == Some(user_id))
            .map(|(id, entry)| (*id, entry.outbound.clone()))
            .collect()
    }

    pub async fn outbound_of(&self, id: ConnectionId) -> Option<Arc<dyn Outbound>> {
        self.entries
            .read()
            .await
            .get(&id)
            .map(|entry| entry.outbound.clone())
    }

    pub async fn is_user_connected(&self, user_id: UserId) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|entry| entry.user_id == Some(user_id))
    }

    pub async fn connected_count(&self) -> usize {
        self.entries.read().await.len()
    }
}
