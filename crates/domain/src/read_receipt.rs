use serde::{Deserialize, Serialize};

use crate::value_objects::{MessageId, Timestamp, UserId};

/// 已读回执，以 (message_id, user_id) 为复合主键。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: Timestamp,
}

impl ReadReceipt {
    pub fn new(message_id: MessageId, user_id: UserId, read_at: Timestamp) -> Self {
        Self {
            message_id,
            user_id,
            read_at,
        }
    }
}
