use domain::MessageWithSender;
use serde::Serialize;

/// 一页历史消息，页内按时间正序
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<MessageWithSender>,
    pub total: u64,
    pub has_more: bool,
}
