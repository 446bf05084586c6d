//! 跨进程扇出测试：多个"进程"（各自的注册表+分发循环）接在同一条
//! 共享总线上，信封广播给所有进程，只有持有接收者连接的进程转发。

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use application::bus::{BusError, BusStream, Envelope, NotificationBus};
use application::cache::memory::MemoryNotificationCache;
use application::cache::NotificationCache;
use application::repository::memory::MemorySettingsStore;
use application::LocalNotificationBus;
use async_trait::async_trait;
use common::{settle, user, FakeConnection, TestProcess};
use domain::{DeliveryRecord, Notification, NotificationKind};
use infrastructure::FallbackNotificationBus;

fn notification_for(recipient: domain::UserId) -> (Notification, Vec<DeliveryRecord>) {
    let notification = Notification::new(NotificationKind::Mention, "提及", "你被 @ 了");
    let record = DeliveryRecord::new(recipient, notification.id);
    (notification, vec![record])
}

#[tokio::test]
async fn envelope_reaches_only_processes_holding_connections() {
    let cache = Arc::new(MemoryNotificationCache::new());
    let settings = Arc::new(MemorySettingsStore::new());
    let bus: Arc<dyn NotificationBus> = Arc::new(LocalNotificationBus::new(256));

    // 三个进程共享一条总线
    let process_a = TestProcess::start(cache.clone(), bus.clone(), settings.clone());
    let process_b = TestProcess::start(cache.clone(), bus.clone(), settings.clone());
    let process_c = TestProcess::start(cache.clone(), bus.clone(), settings.clone());
    settle().await;

    let recipient = user();

    // 接收者在进程A有两台设备，进程B有一台，进程C没有连接
    let device_a1 = FakeConnection::new(recipient);
    let device_a2 = FakeConnection::new(recipient);
    let device_b = FakeConnection::new(recipient);
    process_a.registry.register(device_a1.clone());
    process_a.registry.register(device_a2.clone());
    process_b.registry.register(device_b.clone());

    // 进程C持有别人的连接，不该收到任何东西
    let bystander = FakeConnection::new(user());
    process_c.registry.register(bystander.clone());

    let (notification, records) = notification_for(recipient);
    process_a.orchestrator.deliver(&notification, &records).await;
    settle().await;

    // 进程A本地两次发送，进程B一次，进程C零次
    assert_eq!(device_a1.received_count().await, 1);
    assert_eq!(device_a2.received_count().await, 1);
    assert_eq!(device_b.received_count().await, 1);
    assert_eq!(bystander.send_attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_device_is_removed_and_sibling_keeps_receiving() {
    let cache = Arc::new(MemoryNotificationCache::new());
    let settings = Arc::new(MemorySettingsStore::new());
    let bus: Arc<dyn NotificationBus> = Arc::new(LocalNotificationBus::new(256));
    let process = TestProcess::start(cache, bus, settings);
    settle().await;

    let recipient = user();
    let device_a = FakeConnection::failing(recipient);
    let device_b = FakeConnection::new(recipient);
    process.registry.register(device_a.clone());
    process.registry.register(device_b.clone());

    let (notification, records) = notification_for(recipient);
    process.orchestrator.deliver(&notification, &records).await;
    settle().await;

    // 设备A发送失败：立即移除并关闭
    assert_eq!(process.registry.connections_for(recipient).len(), 1);
    assert!(device_a.closed.load(Ordering::SeqCst));
    assert_eq!(device_a.received_count().await, 0);

    // 后续通知只发给设备B，设备A不再有发送尝试
    let attempts_after_removal = device_a.send_attempts.load(Ordering::SeqCst);
    let (notification, records) = notification_for(recipient);
    process.orchestrator.deliver(&notification, &records).await;
    settle().await;

    assert_eq!(device_b.received_count().await, 2);
    assert_eq!(
        device_a.send_attempts.load(Ordering::SeqCst),
        attempts_after_removal
    );
}

#[tokio::test]
async fn zero_connections_anywhere_is_not_an_error() {
    let cache = Arc::new(MemoryNotificationCache::new());
    let settings = Arc::new(MemorySettingsStore::new());
    let bus: Arc<dyn NotificationBus> = Arc::new(LocalNotificationBus::new(256));
    let process = TestProcess::start(cache.clone(), bus, settings);
    settle().await;

    let recipient = user();
    let (notification, records) = notification_for(recipient);
    process.orchestrator.deliver(&notification, &records).await;
    settle().await;

    // 没有任何在线连接：缓存视图照常更新，下次拉取可见
    assert_eq!(cache.get_unread(recipient).await.unwrap(), Some(1));
    assert_eq!(cache.recent(recipient).await.unwrap().len(), 1);
}

/// 总是失败的外部总线
struct BrokenBus;

#[async_trait]
impl NotificationBus for BrokenBus {
    async fn publish(&self, _envelope: Envelope) -> Result<(), BusError> {
        Err(BusError::publish_failed("connection refused"))
    }

    async fn subscribe(&self) -> Result<BusStream, BusError> {
        Err(BusError::subscribe_failed("connection refused"))
    }
}

#[tokio::test]
async fn broken_remote_bus_degrades_to_local_process_delivery() {
    let cache = Arc::new(MemoryNotificationCache::new());
    let settings = Arc::new(MemorySettingsStore::new());

    // 进程A：断路器总线，外部总线彻底不可用
    let bus_a: Arc<dyn NotificationBus> = Arc::new(FallbackNotificationBus::new(
        Arc::new(BrokenBus),
        Arc::new(LocalNotificationBus::new(256)),
    ));
    let process_a = TestProcess::start(cache.clone(), bus_a, settings.clone());

    // 进程B：独立的降级总线（进程内广播互不相通）
    let bus_b: Arc<dyn NotificationBus> = Arc::new(FallbackNotificationBus::new(
        Arc::new(BrokenBus),
        Arc::new(LocalNotificationBus::new(256)),
    ));
    let process_b = TestProcess::start(cache.clone(), bus_b, settings);
    settle().await;

    let recipient = user();
    let local_device = FakeConnection::new(recipient);
    let remote_device = FakeConnection::new(recipient);
    process_a.registry.register(local_device.clone());
    process_b.registry.register(remote_device.clone());

    let (notification, records) = notification_for(recipient);
    process_a.orchestrator.deliver(&notification, &records).await;
    settle().await;

    // 外部总线不可用：本进程的连接仍收到实时推送
    assert_eq!(local_device.received_count().await, 1);
    // 其他进程暂时收不到（靠持久存储在下次拉取补齐）
    assert_eq!(remote_device.received_count().await, 0);
    // 持久视图不受影响
    assert_eq!(cache.get_unread(recipient).await.unwrap(), Some(1));
}
