//! 持久查询表面与缓存一致性测试：未读计数的增减与钳制、
//! 最近列表容量、缓存未命中回源重算。

mod common;

use std::time::Duration;

use application::cache::NotificationCache;
use application::repository::NotificationRepository;
use chrono::Utc;
use common::{settle, start_engine, user};
use domain::{DomainEvent, TargetRef};

const TTL: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn unread_counter_equals_increments_minus_decrements() {
    let engine = start_engine(2);
    let recipient = user();

    // N=5 次增、M=3 次减，交错进行
    for i in 0..5 {
        engine.cache.incr_unread(recipient, TTL).await.unwrap();
        if i < 3 {
            engine.cache.decr_unread(recipient, TTL).await.unwrap();
        }
    }

    assert_eq!(engine.cache.get_unread(recipient).await.unwrap(), Some(2));
}

#[tokio::test]
async fn unread_counter_clamps_at_zero() {
    let engine = start_engine(2);
    let recipient = user();

    engine.cache.incr_unread(recipient, TTL).await.unwrap();
    for _ in 0..4 {
        engine.cache.decr_unread(recipient, TTL).await.unwrap();
    }

    assert_eq!(engine.cache.get_unread(recipient).await.unwrap(), Some(0));
}

#[tokio::test]
async fn recent_list_never_exceeds_cap() {
    let engine = start_engine(2);
    let recipient = user();

    // 超过容量上限（10）的一连串直接通知
    for i in 0..25 {
        engine.service.publish_event(DomainEvent::AchievementUnlocked {
            recipient_id: recipient,
            achievement: format!("成就 {i}"),
            occurred_at: Utc::now(),
        });
    }
    settle().await;

    assert_eq!(engine.store.notification_count().await, 25);
    let recent = engine.cache.recent(recipient).await.unwrap();
    assert_eq!(recent.len(), 10);
}

#[tokio::test]
async fn unread_count_reconciles_from_durable_store_on_miss() {
    let engine = start_engine(2);
    let recipient = user();

    // 直接写入持久层，缓存里没有这个接收者的计数键
    let notification = domain::Notification::new(domain::NotificationKind::Mention, "提及", "x");
    engine.store.create(notification, &[recipient]).await.unwrap();
    assert_eq!(engine.cache.get_unread(recipient).await.unwrap(), None);

    // 查询服务在缓存未命中时回源重算并回填
    let dto = engine.query.unread_count(recipient).await.unwrap();
    assert_eq!(dto.unread, 1);
    assert_eq!(engine.cache.get_unread(recipient).await.unwrap(), Some(1));
}

#[tokio::test]
async fn read_lifecycle_keeps_cache_and_store_consistent() {
    let engine = start_engine(2);
    let recipient = user();

    for _ in 0..2 {
        engine.service.publish_event(DomainEvent::BlogApproved {
            recipient_id: recipient,
            target: TargetRef::new("blog", "blog-1"),
            blog_title: "深入异步".to_string(),
            occurred_at: Utc::now(),
        });
    }
    settle().await;

    let listed = engine.query.list(recipient, 1, 10).await.unwrap();
    assert_eq!(listed.len(), 2);

    engine
        .query
        .mark_read(recipient, listed[0].delivery_id)
        .await
        .unwrap();
    assert_eq!(engine.query.unread_count(recipient).await.unwrap().unread, 1);

    engine.query.mark_all_read(recipient).await.unwrap();
    assert_eq!(engine.query.unread_count(recipient).await.unwrap().unread, 0);
    assert_eq!(engine.store.unread_count(recipient).await.unwrap(), 0);

    // 删除已读记录不影响计数，但记录消失
    engine
        .query
        .delete(recipient, listed[1].delivery_id)
        .await
        .unwrap();
    assert_eq!(engine.store.delivery_count().await, 1);
    assert_eq!(engine.query.unread_count(recipient).await.unwrap().unread, 0);
}
