//! 领域事件定义
//!
//! 定义所有会触发通知的领域事件类型。事件本身不持久化，
//! 只被消费一次：要么进入聚合桶，要么直接生成通知。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::notification::NotificationKind;
use crate::errors::DomainError;
use crate::value_objects::UserId;

/// 事件目标引用（被点赞的博客、被评论的文章等）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    /// 目标类型（见 [`target_kinds`]）
    pub kind: String,
    /// 目标ID（由上游领域模块解释）
    pub id: String,
}

impl TargetRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// 目标类型常量
pub mod target_kinds {
    pub const BLOG: &str = "blog";
    pub const COMMENT: &str = "comment";
    pub const COURSE: &str = "course";
    pub const LESSON: &str = "lesson";
    pub const EXAM: &str = "exam";
    pub const CONVERSATION: &str = "conversation";
    pub const SYSTEM: &str = "system";
}

/// 领域事件枚举
///
/// 每个变体携带自己需要的上下文；翻译为通知时在唯一的分发点做穷尽匹配。
/// 线上形态用 `type` 字段区分变体，与通知类型名保持一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// 用户在评论/正文中被提及
    Mention {
        actor_id: UserId,
        recipient_id: UserId,
        target: TargetRef,
        excerpt: Option<String>,
        #[serde(default = "Utc::now")]
        occurred_at: DateTime<Utc>,
    },

    /// 博文被点赞
    PostLiked {
        actor_id: UserId,
        recipient_id: UserId,
        target: TargetRef,
        #[serde(default = "Utc::now")]
        occurred_at: DateTime<Utc>,
    },

    /// 博文收到评论
    PostCommented {
        actor_id: UserId,
        recipient_id: UserId,
        target: TargetRef,
        excerpt: Option<String>,
        #[serde(default = "Utc::now")]
        occurred_at: DateTime<Utc>,
    },

    /// 博客审核通过
    BlogApproved {
        recipient_id: UserId,
        target: TargetRef,
        blog_title: String,
        #[serde(default = "Utc::now")]
        occurred_at: DateTime<Utc>,
    },

    /// 成就解锁
    AchievementUnlocked {
        recipient_id: UserId,
        achievement: String,
        #[serde(default = "Utc::now")]
        occurred_at: DateTime<Utc>,
    },

    /// 系统公告（可能广播给大量用户）
    SystemAnnouncement {
        recipient_ids: Vec<UserId>,
        title: String,
        body: String,
        #[serde(default = "Utc::now")]
        occurred_at: DateTime<Utc>,
    },

    /// 聊天消息
    ChatMessage {
        actor_id: UserId,
        recipient_id: UserId,
        conversation: TargetRef,
        excerpt: String,
        #[serde(default = "Utc::now")]
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// 事件对应的通知类型
    pub fn kind(&self) -> NotificationKind {
        match self {
            DomainEvent::Mention { .. } => NotificationKind::Mention,
            DomainEvent::PostLiked { .. } => NotificationKind::PostLiked,
            DomainEvent::PostCommented { .. } => NotificationKind::PostCommented,
            DomainEvent::BlogApproved { .. } => NotificationKind::BlogApproved,
            DomainEvent::AchievementUnlocked { .. } => NotificationKind::AchievementUnlocked,
            DomainEvent::SystemAnnouncement { .. } => NotificationKind::SystemAnnouncement,
            DomainEvent::ChatMessage { .. } => NotificationKind::ChatMessage,
        }
    }

    /// 事件类型名称（用于日志和监控）
    pub fn event_type(&self) -> &'static str {
        self.kind().as_str()
    }

    /// 事件的接收者列表
    pub fn recipients(&self) -> Vec<UserId> {
        match self {
            DomainEvent::Mention { recipient_id, .. }
            | DomainEvent::PostLiked { recipient_id, .. }
            | DomainEvent::PostCommented { recipient_id, .. }
            | DomainEvent::BlogApproved { recipient_id, .. }
            | DomainEvent::AchievementUnlocked { recipient_id, .. }
            | DomainEvent::ChatMessage { recipient_id, .. } => vec![*recipient_id],
            DomainEvent::SystemAnnouncement { recipient_ids, .. } => recipient_ids.clone(),
        }
    }

    /// 事件的目标引用（成就解锁没有外部目标）
    pub fn target(&self) -> Option<&TargetRef> {
        match self {
            DomainEvent::Mention { target, .. }
            | DomainEvent::PostLiked { target, .. }
            | DomainEvent::PostCommented { target, .. }
            | DomainEvent::BlogApproved { target, .. } => Some(target),
            DomainEvent::ChatMessage { conversation, .. } => Some(conversation),
            DomainEvent::AchievementUnlocked { .. } | DomainEvent::SystemAnnouncement { .. } => {
                None
            }
        }
    }

    /// 事件的发生时间
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::Mention { occurred_at, .. }
            | DomainEvent::PostLiked { occurred_at, .. }
            | DomainEvent::PostCommented { occurred_at, .. }
            | DomainEvent::BlogApproved { occurred_at, .. }
            | DomainEvent::AchievementUnlocked { occurred_at, .. }
            | DomainEvent::SystemAnnouncement { occurred_at, .. }
            | DomainEvent::ChatMessage { occurred_at, .. } => *occurred_at,
        }
    }

    /// 检查事件是否参与时间窗聚合
    ///
    /// 聚合只用于抑制高频低信号事件；审批、成就、公告、聊天消息
    /// 都直接生成通知。
    pub fn is_aggregatable(&self) -> bool {
        matches!(
            self,
            DomainEvent::Mention { .. }
                | DomainEvent::PostLiked { .. }
                | DomainEvent::PostCommented { .. }
        )
    }

    /// 校验事件携带可解析的接收者与目标
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.recipients().is_empty() {
            return Err(DomainError::invalid_event("event has no recipients"));
        }
        if let Some(target) = self.target() {
            if target.id.trim().is_empty() {
                return Err(DomainError::invalid_event("event target id is empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn like_event(recipient: UserId) -> DomainEvent {
        DomainEvent::PostLiked {
            actor_id: UserId::new(Uuid::new_v4()),
            recipient_id: recipient,
            target: TargetRef::new(target_kinds::BLOG, "blog-1"),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = like_event(UserId::new(Uuid::new_v4()));

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, deserialized);
    }

    #[test]
    fn test_wire_format_uses_type_tag() {
        let event = like_event(UserId::new(Uuid::new_v4()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "post_liked");

        // 缺省 occurred_at 由服务端补齐
        let raw = serde_json::json!({
            "type": "achievement_unlocked",
            "recipient_id": Uuid::new_v4(),
            "achievement": "百日打卡",
        });
        let parsed: DomainEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.kind(), NotificationKind::AchievementUnlocked);
    }

    #[test]
    fn test_aggregatable_split() {
        let recipient = UserId::new(Uuid::new_v4());
        assert!(like_event(recipient).is_aggregatable());

        let chat = DomainEvent::ChatMessage {
            actor_id: UserId::new(Uuid::new_v4()),
            recipient_id: recipient,
            conversation: TargetRef::new(target_kinds::CONVERSATION, "c-9"),
            excerpt: "hello".to_string(),
            occurred_at: Utc::now(),
        };
        assert!(!chat.is_aggregatable());

        let approval = DomainEvent::BlogApproved {
            recipient_id: recipient,
            target: TargetRef::new(target_kinds::BLOG, "blog-2"),
            blog_title: "On Rust".to_string(),
            occurred_at: Utc::now(),
        };
        assert!(!approval.is_aggregatable());
    }

    #[test]
    fn test_announcement_fans_out_to_all_recipients() {
        let recipients = vec![
            UserId::new(Uuid::new_v4()),
            UserId::new(Uuid::new_v4()),
            UserId::new(Uuid::new_v4()),
        ];
        let event = DomainEvent::SystemAnnouncement {
            recipient_ids: recipients.clone(),
            title: "maintenance".to_string(),
            body: "tonight 2am".to_string(),
            occurred_at: Utc::now(),
        };

        assert_eq!(event.recipients(), recipients);
        assert_eq!(event.kind(), NotificationKind::SystemAnnouncement);
    }

    #[test]
    fn test_validate_rejects_empty_target_id() {
        let event = DomainEvent::PostLiked {
            actor_id: UserId::new(Uuid::new_v4()),
            recipient_id: UserId::new(Uuid::new_v4()),
            target: TargetRef::new(target_kinds::BLOG, "  "),
            occurred_at: Utc::now(),
        };
        assert!(event.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_announcement_without_recipients() {
        let event = DomainEvent::SystemAnnouncement {
            recipient_ids: Vec::new(),
            title: "t".to_string(),
            body: "b".to_string(),
            occurred_at: Utc::now(),
        };
        assert!(event.validate().is_err());
    }
}
