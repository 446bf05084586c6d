//! 通知实体定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::errors::DomainError;
use crate::value_objects::{DeliveryId, NotificationId, UserId};

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    PostLiked,
    PostCommented,
    BlogApproved,
    AchievementUnlocked,
    SystemAnnouncement,
    ChatMessage,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Mention => "mention",
            NotificationKind::PostLiked => "post_liked",
            NotificationKind::PostCommented => "post_commented",
            NotificationKind::BlogApproved => "blog_approved",
            NotificationKind::AchievementUnlocked => "achievement_unlocked",
            NotificationKind::SystemAnnouncement => "system_announcement",
            NotificationKind::ChatMessage => "chat_message",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "mention" => Ok(NotificationKind::Mention),
            "post_liked" => Ok(NotificationKind::PostLiked),
            "post_commented" => Ok(NotificationKind::PostCommented),
            "blog_approved" => Ok(NotificationKind::BlogApproved),
            "achievement_unlocked" => Ok(NotificationKind::AchievementUnlocked),
            "system_announcement" => Ok(NotificationKind::SystemAnnouncement),
            "chat_message" => Ok(NotificationKind::ChatMessage),
            other => Err(DomainError::UnknownKind {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通知实体
///
/// 规范记录，创建后不可变。一条通知可以被多条投递记录引用
/// （系统公告对多个接收者扇出时共享同一条通知）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// 通知ID
    pub id: NotificationId,
    /// 通知类型
    pub kind: NotificationKind,
    /// 通知标题（已渲染的最终文案）
    pub title: String,
    /// 通知内容（已渲染的最终文案）
    pub content: String,
    /// 目标类型
    pub target_kind: Option<String>,
    /// 目标ID
    pub target_id: Option<String>,
    /// 元数据
    pub metadata: JsonValue,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// 创建新通知
    pub fn new(kind: NotificationKind, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: NotificationId::generate(),
            kind,
            title: title.into(),
            content: content.into(),
            target_kind: None,
            target_id: None,
            metadata: JsonValue::Object(serde_json::Map::new()),
            created_at: Utc::now(),
        }
    }

    /// 附加目标引用
    pub fn with_target(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.target_kind = Some(kind.into());
        self.target_id = Some(id.into());
        self
    }

    /// 附加元数据
    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }

    /// 添加元数据字段
    pub fn add_metadata_field(&mut self, key: impl Into<String>, value: JsonValue) {
        if let JsonValue::Object(ref mut map) = self.metadata {
            map.insert(key.into(), value);
        }
    }
}

/// 投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Unread,
    Read,
}

/// 投递记录
///
/// 归接收者所有的已读/未读状态，引用共享的通知记录。
/// 删除投递记录不影响其引用的通知。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// 记录ID
    pub id: DeliveryId,
    /// 接收者ID
    pub recipient_id: UserId,
    /// 引用的通知ID
    pub notification_id: NotificationId,
    /// 投递状态
    pub status: DeliveryStatus,
    /// 阅读时间
    pub read_at: Option<DateTime<Utc>>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

impl DeliveryRecord {
    /// 为接收者创建未读投递记录
    pub fn new(recipient_id: UserId, notification_id: NotificationId) -> Self {
        Self {
            id: DeliveryId::generate(),
            recipient_id,
            notification_id,
            status: DeliveryStatus::Unread,
            read_at: None,
            created_at: Utc::now(),
        }
    }

    /// 标记为已读（幂等）
    pub fn mark_as_read(&mut self) {
        if self.status == DeliveryStatus::Unread {
            self.status = DeliveryStatus::Read;
            self.read_at = Some(Utc::now());
        }
    }

    pub fn is_unread(&self) -> bool {
        self.status == DeliveryStatus::Unread
    }
}
