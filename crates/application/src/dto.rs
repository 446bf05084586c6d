use chrono::{DateTime, Utc};
use domain::{
    DeliveryId, DeliveryRecord, DeliveryStatus, Notification, NotificationId, NotificationKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 推送负载（线上格式）
///
/// 通过总线和传输通道下发的序列化形态；也是最近列表里缓存的条目。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub delivery_id: DeliveryId,
    pub notification_id: NotificationId,
    pub kind: NotificationKind,
    pub title: String,
    pub content: String,
    pub target_kind: Option<String>,
    pub target_id: Option<String>,
    pub metadata: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl PushPayload {
    pub fn from_parts(notification: &Notification, record: &DeliveryRecord) -> Self {
        Self {
            delivery_id: record.id,
            notification_id: notification.id,
            kind: notification.kind,
            title: notification.title.clone(),
            content: notification.content.clone(),
            target_kind: notification.target_kind.clone(),
            target_id: notification.target_id.clone(),
            metadata: notification.metadata.clone(),
            created_at: notification.created_at,
        }
    }

    /// 传输层的命名事件：聊天消息与普通通知分流
    pub fn event_name(&self) -> &'static str {
        match self.kind {
            NotificationKind::ChatMessage => "chat_message",
            _ => "notification",
        }
    }
}

/// 通知查询 DTO（REST 查询表面的响应形态）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDto {
    pub delivery_id: DeliveryId,
    pub notification_id: NotificationId,
    pub kind: NotificationKind,
    pub title: String,
    pub content: String,
    pub target_kind: Option<String>,
    pub target_id: Option<String>,
    pub metadata: JsonValue,
    pub status: DeliveryStatus,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NotificationDto {
    pub fn from_row(record: &DeliveryRecord, notification: &Notification) -> Self {
        Self {
            delivery_id: record.id,
            notification_id: notification.id,
            kind: notification.kind,
            title: notification.title.clone(),
            content: notification.content.clone(),
            target_kind: notification.target_kind.clone(),
            target_id: notification.target_id.clone(),
            metadata: notification.metadata.clone(),
            status: record.status,
            read_at: record.read_at,
            created_at: notification.created_at,
        }
    }

}

/// 未读计数响应
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountDto {
    pub unread: i64,
}
