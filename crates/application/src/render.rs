//! 通知文案渲染
//!
//! 领域事件到最终标题/正文的唯一翻译点。模板和国际化在上游完成，
//! 这里产出的就是下发给客户端的字符串。

use domain::{DomainEvent, NotificationKind};

/// 聚合通知文案：由 `(类型, 次数)` 渲染
pub fn render_aggregated(kind: NotificationKind, count: usize) -> (String, String) {
    match kind {
        NotificationKind::Mention => (
            "有人提到了你".to_string(),
            format!("你被提及了 {count} 次"),
        ),
        NotificationKind::PostLiked => (
            "收到新的点赞".to_string(),
            format!("你的博文收到了 {count} 个赞"),
        ),
        NotificationKind::PostCommented => (
            "收到新的评论".to_string(),
            format!("你的博文收到了 {count} 条新评论"),
        ),
        // 非聚合类型不会进入扫描路径，给出兜底文案
        other => (
            "你有新的通知".to_string(),
            format!("{} x{count}", other.as_str()),
        ),
    }
}

/// 直接通知文案：由单个事件渲染
pub fn render_event(event: &DomainEvent) -> (String, String) {
    match event {
        DomainEvent::Mention { excerpt, .. } => (
            "有人提到了你".to_string(),
            excerpt
                .clone()
                .unwrap_or_else(|| "你在一条内容中被提及".to_string()),
        ),
        DomainEvent::PostLiked { .. } => (
            "收到新的点赞".to_string(),
            "你的博文收到了 1 个赞".to_string(),
        ),
        DomainEvent::PostCommented { excerpt, .. } => (
            "收到新的评论".to_string(),
            excerpt
                .clone()
                .unwrap_or_else(|| "你的博文收到了新评论".to_string()),
        ),
        DomainEvent::BlogApproved { blog_title, .. } => (
            "博客审核通过".to_string(),
            format!("《{blog_title}》已通过审核并发布"),
        ),
        DomainEvent::AchievementUnlocked { achievement, .. } => (
            "成就解锁".to_string(),
            format!("恭喜解锁成就「{achievement}」"),
        ),
        DomainEvent::SystemAnnouncement { title, body, .. } => (title.clone(), body.clone()),
        DomainEvent::ChatMessage { excerpt, .. } => ("新消息".to_string(), excerpt.clone()),
    }
}
