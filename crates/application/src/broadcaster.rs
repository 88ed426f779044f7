use std::sync::Arc;

use domain::{RoomId, UserId};

use crate::connection::{ConnectionId, ConnectionRegistry, Target};
use crate::protocol::ServerFrame;

/// 按房间或按用户把帧投递到注册表里的连接。
///
/// 帧只序列化一次；单个连接发送失败只记录日志，不影响其他连接。
/// 返回接受该帧的连接数。
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn to_room(&self, room_id: RoomId, frame: &ServerFrame) -> usize {
        let targets = self.registry.room_targets(room_id).await;
        let delivered = deliver(&targets, frame);
        tracing::debug!(
            room_id = %room_id,
            targets = targets.len(),
            delivered,
            "room broadcast"
        );
        delivered
    }

    pub async fn to_user(&self, user_id: UserId, frame: &ServerFrame) -> usize {
        let targets = self.registry.user_targets(user_id).await;
        deliver(&targets, frame)
    }

    /// 回复单个连接
    pub async fn to_connection(&self, connection_id: ConnectionId, frame: &ServerFrame) -> bool {
        match self.registry.outbound_of(connection_id).await {
            Some(outbound) => deliver(&[(connection_id, outbound)], frame) == 1,
            None => false,
        }
    }
}

fn deliver(targets: &[Target], frame: &ServerFrame) -> usize {
    if targets.is_empty() {
        return 0;
    }
    let text = match frame.to_text() {
        Ok(text) => text,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize frame");
            return 0;
        }
    };

    let mut delivered = 0;
    for (connection_id, outbound) in targets {
        // 正在关闭的连接直接跳过
        if !outbound.is_open() {
            continue;
        }
        match outbound.send(text.clone()) {
            Ok(()) => delivered += 1,
            Err(err) => {
                tracing::warn!(connection_id = %connection_id, error = %err, "send failed");
            }
        }
    }
    delivered
}
