use async_trait::async_trait;
use domain::{
    DeliveryRecord, DeliveryId, Notification, NotificationId, NotificationKind, RepositoryError,
    UserId,
};

/// 通知持久化端口
///
/// 持久层是唯一的权威数据源：通知先落库再做任何实时扇出。
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// 保存通知并为每个接收者创建一条未读投递记录
    async fn create(
        &self,
        notification: Notification,
        recipients: &[UserId],
    ) -> Result<Vec<DeliveryRecord>, RepositoryError>;

    /// 分页查询接收者的通知（最新在前），返回投递记录与引用的通知
    async fn list_for_recipient(
        &self,
        recipient_id: UserId,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<(DeliveryRecord, Notification)>, RepositoryError>;

    /// 接收者的未读投递记录数（权威计数）
    async fn unread_count(&self, recipient_id: UserId) -> Result<i64, RepositoryError>;

    /// 标记单条投递记录已读；记录不存在或不属于该接收者时返回 NotFound。
    /// 返回更新前是否未读（幂等调用返回 false）。
    async fn mark_read(
        &self,
        recipient_id: UserId,
        delivery_id: DeliveryId,
    ) -> Result<bool, RepositoryError>;

    /// 标记接收者的全部投递记录已读，返回受影响的行数
    async fn mark_all_read(&self, recipient_id: UserId) -> Result<u64, RepositoryError>;

    /// 删除投递记录（不影响引用的通知），返回被删除的记录
    async fn delete(
        &self,
        recipient_id: UserId,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryRecord, RepositoryError>;
}

/// 通知偏好端口（外部设置模块的边界）
///
/// 没有设置记录的用户默认全部开启。
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn is_kind_enabled(
        &self,
        recipient_id: UserId,
        kind: NotificationKind,
    ) -> Result<bool, RepositoryError>;

    async fn is_push_enabled(&self, recipient_id: UserId) -> Result<bool, RepositoryError>;
}

/// 内存实现（用于测试和单进程开发环境）
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct StoreState {
        notifications: HashMap<NotificationId, Notification>,
        deliveries: Vec<DeliveryRecord>,
    }

    #[derive(Default)]
    pub struct MemoryNotificationStore {
        state: Mutex<StoreState>,
    }

    impl MemoryNotificationStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// 测试辅助：当前投递记录总数
        pub async fn delivery_count(&self) -> usize {
            self.state.lock().await.deliveries.len()
        }

        /// 测试辅助：存储中的通知总数
        pub async fn notification_count(&self) -> usize {
            self.state.lock().await.notifications.len()
        }
    }

    #[async_trait]
    impl NotificationRepository for MemoryNotificationStore {
        async fn create(
            &self,
            notification: Notification,
            recipients: &[UserId],
        ) -> Result<Vec<DeliveryRecord>, RepositoryError> {
            let mut state = self.state.lock().await;
            let records: Vec<DeliveryRecord> = recipients
                .iter()
                .map(|recipient| DeliveryRecord::new(*recipient, notification.id))
                .collect();

            state.notifications.insert(notification.id, notification);
            state.deliveries.extend(records.iter().cloned());
            Ok(records)
        }

        async fn list_for_recipient(
            &self,
            recipient_id: UserId,
            page: u32,
            per_page: u32,
        ) -> Result<Vec<(DeliveryRecord, Notification)>, RepositoryError> {
            let state = self.state.lock().await;
            let mut rows: Vec<(DeliveryRecord, Notification)> = state
                .deliveries
                .iter()
                .filter(|record| record.recipient_id == recipient_id)
                .filter_map(|record| {
                    state
                        .notifications
                        .get(&record.notification_id)
                        .map(|notification| (record.clone(), notification.clone()))
                })
                .collect();

            rows.sort_by(|a, b| b.0.created_at.cmp(&a.0.created_at));

            let offset = page.saturating_sub(1) as usize * per_page as usize;
            Ok(rows
                .into_iter()
                .skip(offset)
                .take(per_page as usize)
                .collect())
        }

        async fn unread_count(&self, recipient_id: UserId) -> Result<i64, RepositoryError> {
            let state = self.state.lock().await;
            Ok(state
                .deliveries
                .iter()
                .filter(|record| record.recipient_id == recipient_id && record.is_unread())
                .count() as i64)
        }

        async fn mark_read(
            &self,
            recipient_id: UserId,
            delivery_id: DeliveryId,
        ) -> Result<bool, RepositoryError> {
            let mut state = self.state.lock().await;
            let record = state
                .deliveries
                .iter_mut()
                .find(|record| record.id == delivery_id && record.recipient_id == recipient_id)
                .ok_or(RepositoryError::NotFound)?;

            let was_unread = record.is_unread();
            record.mark_as_read();
            Ok(was_unread)
        }

        async fn mark_all_read(&self, recipient_id: UserId) -> Result<u64, RepositoryError> {
            let mut state = self.state.lock().await;
            let mut updated = 0;
            for record in state
                .deliveries
                .iter_mut()
                .filter(|record| record.recipient_id == recipient_id && record.is_unread())
            {
                record.mark_as_read();
                updated += 1;
            }
            Ok(updated)
        }

        async fn delete(
            &self,
            recipient_id: UserId,
            delivery_id: DeliveryId,
        ) -> Result<DeliveryRecord, RepositoryError> {
            let mut state = self.state.lock().await;
            let index = state
                .deliveries
                .iter()
                .position(|record| {
                    record.id == delivery_id && record.recipient_id == recipient_id
                })
                .ok_or(RepositoryError::NotFound)?;

            Ok(state.deliveries.remove(index))
        }
    }

    /// 内存设置存储：显式记录的开关 + 缺省全开
    #[derive(Default)]
    pub struct MemorySettingsStore {
        disabled_kinds: Mutex<HashSet<(UserId, NotificationKind)>>,
        push_disabled: Mutex<HashSet<UserId>>,
    }

    impl MemorySettingsStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn disable_kind(&self, recipient_id: UserId, kind: NotificationKind) {
            self.disabled_kinds.lock().await.insert((recipient_id, kind));
        }

        pub async fn disable_push(&self, recipient_id: UserId) {
            self.push_disabled.lock().await.insert(recipient_id);
        }
    }

    #[async_trait]
    impl SettingsStore for MemorySettingsStore {
        async fn is_kind_enabled(
            &self,
            recipient_id: UserId,
            kind: NotificationKind,
        ) -> Result<bool, RepositoryError> {
            let disabled = self.disabled_kinds.lock().await;
            Ok(!disabled.contains(&(recipient_id, kind)))
        }

        async fn is_push_enabled(&self, recipient_id: UserId) -> Result<bool, RepositoryError> {
            let disabled = self.push_disabled.lock().await;
            Ok(!disabled.contains(&recipient_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryNotificationStore, MemorySettingsStore};
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_create_fans_out_one_record_per_recipient() {
        let store = MemoryNotificationStore::new();
        let recipients = vec![UserId::new(Uuid::new_v4()), UserId::new(Uuid::new_v4())];
        let notification =
            Notification::new(NotificationKind::SystemAnnouncement, "公告", "今晚维护");

        let records = store.create(notification, &recipients).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(store.notification_count().await, 1);

        for (record, recipient) in records.iter().zip(&recipients) {
            assert_eq!(record.recipient_id, *recipient);
            assert!(record.is_unread());
        }
    }

    #[tokio::test]
    async fn test_mark_read_reports_prior_state() {
        let store = MemoryNotificationStore::new();
        let recipient = UserId::new(Uuid::new_v4());
        let notification = Notification::new(NotificationKind::Mention, "提及", "被 @ 了");
        let records = store.create(notification, &[recipient]).await.unwrap();
        let delivery_id = records[0].id;

        assert!(store.mark_read(recipient, delivery_id).await.unwrap());
        assert!(!store.mark_read(recipient, delivery_id).await.unwrap());
        assert_eq!(store.unread_count(recipient).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_read_checks_ownership() {
        let store = MemoryNotificationStore::new();
        let owner = UserId::new(Uuid::new_v4());
        let intruder = UserId::new(Uuid::new_v4());
        let notification = Notification::new(NotificationKind::Mention, "提及", "x");
        let records = store.create(notification, &[owner]).await.unwrap();

        let result = store.mark_read(intruder, records[0].id).await;
        assert_eq!(result, Err(RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_delete_keeps_shared_notification() {
        let store = MemoryNotificationStore::new();
        let a = UserId::new(Uuid::new_v4());
        let b = UserId::new(Uuid::new_v4());
        let notification =
            Notification::new(NotificationKind::SystemAnnouncement, "公告", "今晚维护");
        let records = store.create(notification, &[a, b]).await.unwrap();

        store.delete(a, records[0].id).await.unwrap();

        // b 的投递记录仍指向同一条通知
        assert_eq!(store.notification_count().await, 1);
        let remaining = store.list_for_recipient(b, 1, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_settings_default_to_enabled() {
        let settings = MemorySettingsStore::new();
        let user = UserId::new(Uuid::new_v4());

        // 没有任何设置记录的用户：一切默认开启
        assert!(settings
            .is_kind_enabled(user, NotificationKind::PostLiked)
            .await
            .unwrap());
        assert!(settings.is_push_enabled(user).await.unwrap());

        settings.disable_kind(user, NotificationKind::PostLiked).await;
        assert!(!settings
            .is_kind_enabled(user, NotificationKind::PostLiked)
            .await
            .unwrap());
        assert!(settings
            .is_kind_enabled(user, NotificationKind::Mention)
            .await
            .unwrap());
    }
}
