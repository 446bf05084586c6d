//! 端到端投递管道测试：事件入队 → 偏好过滤 → 聚合/直接通知 →
//! 持久化 → 缓存视图 → 总线 → 本地连接扇出。

mod common;

use application::cache::NotificationCache;
use application::repository::{NotificationRepository, SettingsStore};
use chrono::Utc;
use common::{settle, start_engine, user, FakeConnection};
use domain::{DomainEvent, NotificationKind, TargetRef, UserId};
use uuid::Uuid;

fn like(recipient: UserId, target: &str) -> DomainEvent {
    DomainEvent::PostLiked {
        actor_id: user(),
        recipient_id: recipient,
        target: TargetRef::new("blog", target),
        occurred_at: Utc::now(),
    }
}

#[tokio::test]
async fn three_likes_collapse_into_one_notification() {
    let engine = start_engine(2);
    let recipient = user();
    let device = FakeConnection::new(recipient);
    engine.registry.register(device.clone());

    // 同一博文、同一接收者、窗口内的 3 个点赞
    for _ in 0..3 {
        engine.service.publish_event(like(recipient, "blog-7"));
    }
    settle().await;

    // 扫描前：没有任何通知
    assert_eq!(engine.store.notification_count().await, 0);
    assert_eq!(device.received_count().await, 0);

    assert_eq!(engine.aggregation.sweep().await, 1);
    settle().await;

    // 恰好一条聚合通知、一条投递记录
    assert_eq!(engine.store.notification_count().await, 1);
    assert_eq!(engine.store.delivery_count().await, 1);

    let rows = engine.store.list_for_recipient(recipient, 1, 10).await.unwrap();
    let (_, notification) = &rows[0];
    assert_eq!(notification.kind, NotificationKind::PostLiked);
    assert!(notification.content.contains('3'));

    // 实时路径：在线设备收到推送，未读计数就位
    assert_eq!(device.received_count().await, 1);
    assert_eq!(engine.cache.get_unread(recipient).await.unwrap(), Some(1));
}

#[tokio::test]
async fn below_threshold_bucket_produces_nothing() {
    let engine = start_engine(3);
    let recipient = user();

    engine.service.publish_event(like(recipient, "blog-1"));
    engine.service.publish_event(like(recipient, "blog-1"));
    settle().await;

    assert_eq!(engine.aggregation.sweep().await, 0);
    assert_eq!(engine.store.notification_count().await, 0);
    // 桶还在，等未来的扫描或TTL过期
    assert_eq!(engine.cache.bucket_keys().await.unwrap().len(), 1);
}

#[tokio::test]
async fn chat_message_skips_aggregation_and_pushes_immediately() {
    let engine = start_engine(2);
    let recipient = user();
    let device = FakeConnection::new(recipient);
    engine.registry.register(device.clone());

    engine.service.publish_event(DomainEvent::ChatMessage {
        actor_id: user(),
        recipient_id: recipient,
        conversation: TargetRef::new("conversation", "c-1"),
        excerpt: "晚上开会吗".to_string(),
        occurred_at: Utc::now(),
    });
    settle().await;

    // 不经过扫描直接可见
    assert_eq!(engine.store.notification_count().await, 1);
    assert_eq!(device.received_count().await, 1);

    let received = device.received.lock().await;
    assert_eq!(received[0].event_name(), "chat_message");
    assert_eq!(received[0].content, "晚上开会吗");
}

#[tokio::test]
async fn disabled_kind_produces_no_side_effects() {
    let engine = start_engine(2);
    let recipient = user();
    engine
        .settings
        .disable_kind(recipient, NotificationKind::PostLiked)
        .await;

    for _ in 0..3 {
        engine.service.publish_event(like(recipient, "blog-9"));
    }
    settle().await;
    engine.aggregation.sweep().await;

    // 关掉的类型连聚合桶都不进
    assert_eq!(engine.cache.bucket_keys().await.unwrap().len(), 0);
    assert_eq!(engine.store.notification_count().await, 0);
    assert_eq!(engine.cache.get_unread(recipient).await.unwrap(), None);
}

#[tokio::test]
async fn settings_default_to_enabled_without_record() {
    let engine = start_engine(2);
    // 从未写过任何设置的用户
    let recipient = UserId::new(Uuid::new_v4());

    assert!(engine
        .settings
        .is_kind_enabled(recipient, NotificationKind::PostLiked)
        .await
        .unwrap());

    engine.service.publish_event(DomainEvent::BlogApproved {
        recipient_id: recipient,
        target: TargetRef::new("blog", "blog-3"),
        blog_title: "Rust 并发模型".to_string(),
        occurred_at: Utc::now(),
    });
    settle().await;

    assert_eq!(engine.store.notification_count().await, 1);
}

#[tokio::test]
async fn announcement_shares_notification_across_recipients() {
    let engine = start_engine(2);
    let recipients: Vec<UserId> = (0..3).map(|_| user()).collect();

    engine.service.publish_event(DomainEvent::SystemAnnouncement {
        recipient_ids: recipients.clone(),
        title: "系统维护".to_string(),
        body: "今晚 2:00-4:00".to_string(),
        occurred_at: Utc::now(),
    });
    settle().await;

    // 一条共享通知，按接收者扇出三条投递记录
    assert_eq!(engine.store.notification_count().await, 1);
    assert_eq!(engine.store.delivery_count().await, 3);
    for recipient in &recipients {
        assert_eq!(engine.store.unread_count(*recipient).await.unwrap(), 1);
    }
}

#[tokio::test]
async fn failed_event_never_reaches_caller() {
    let engine = start_engine(2);

    // 无接收者的公告是无效事件：被校验拦下、落日志、丢弃
    engine.service.publish_event(DomainEvent::SystemAnnouncement {
        recipient_ids: Vec::new(),
        title: "t".to_string(),
        body: "b".to_string(),
        occurred_at: Utc::now(),
    });
    settle().await;

    assert_eq!(engine.store.notification_count().await, 0);

    // 队列仍然健康，后续事件正常处理
    let recipient = user();
    engine.service.publish_event(DomainEvent::AchievementUnlocked {
        recipient_id: recipient,
        achievement: "七日连更".to_string(),
        occurred_at: Utc::now(),
    });
    settle().await;
    assert_eq!(engine.store.notification_count().await, 1);
}

#[tokio::test]
async fn sweep_again_after_consumption_creates_no_duplicates() {
    let engine = start_engine(2);
    let recipient = user();

    for _ in 0..2 {
        engine.service.publish_event(like(recipient, "blog-1"));
    }
    settle().await;

    assert_eq!(engine.aggregation.sweep().await, 1);
    engine.cache.release_lock("agg:sweep:lock").await;
    assert_eq!(engine.aggregation.sweep().await, 0);

    assert_eq!(engine.store.notification_count().await, 1);
}
