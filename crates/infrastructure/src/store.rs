//! PostgreSQL 持久存储
//!
//! 通知与投递记录的权威数据源。通知本体与投递记录分表：一条通知
//! 可被多条投递记录引用，删除投递记录不影响通知本体。

use application::repository::{NotificationRepository, SettingsStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    DeliveryId, DeliveryRecord, DeliveryStatus, Notification, NotificationId, NotificationKind,
    RepositoryError, UserId,
};
use sqlx::{FromRow, PgPool};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

pub async fn create_pg_pool(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
}

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct DeliveryRow {
    id: Uuid,
    recipient_id: Uuid,
    notification_id: Uuid,
    status: String,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DeliveryRow> for DeliveryRecord {
    type Error = RepositoryError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let status = match row.status.as_str() {
            "unread" => DeliveryStatus::Unread,
            "read" => DeliveryStatus::Read,
            other => return Err(invalid_data(format!("unknown delivery status: {other}"))),
        };

        Ok(DeliveryRecord {
            id: DeliveryId::from(row.id),
            recipient_id: UserId::from(row.recipient_id),
            notification_id: NotificationId::from(row.notification_id),
            status,
            read_at: row.read_at,
            created_at: row.created_at,
        })
    }
}

/// 列表查询取回的联表行
#[derive(Debug, FromRow)]
struct ListRow {
    delivery_id: Uuid,
    recipient_id: Uuid,
    notification_id: Uuid,
    status: String,
    read_at: Option<DateTime<Utc>>,
    delivery_created_at: DateTime<Utc>,
    kind: String,
    title: String,
    content: String,
    target_kind: Option<String>,
    target_id: Option<String>,
    metadata: serde_json::Value,
    notification_created_at: DateTime<Utc>,
}

fn status_str(status: DeliveryStatus) -> &'static str {
    match status {
        DeliveryStatus::Unread => "unread",
        DeliveryStatus::Read => "read",
    }
}

/// PostgreSQL实现的通知存储
#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationStore {
    async fn create(
        &self,
        notification: Notification,
        recipients: &[UserId],
    ) -> Result<Vec<DeliveryRecord>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO notifications (id, kind, title, content, target_kind, target_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::from(notification.id))
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.content)
        .bind(&notification.target_kind)
        .bind(&notification.target_id)
        .bind(&notification.metadata)
        .bind(notification.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let records: Vec<DeliveryRecord> = recipients
            .iter()
            .map(|recipient| DeliveryRecord::new(*recipient, notification.id))
            .collect();

        for record in &records {
            sqlx::query(
                r#"
                INSERT INTO notification_deliveries (id, recipient_id, notification_id, status, read_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(Uuid::from(record.id))
            .bind(Uuid::from(record.recipient_id))
            .bind(Uuid::from(record.notification_id))
            .bind(status_str(record.status))
            .bind(record.read_at)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(records)
    }

    async fn list_for_recipient(
        &self,
        recipient_id: UserId,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<(DeliveryRecord, Notification)>, RepositoryError> {
        let offset = page.saturating_sub(1) as i64 * per_page as i64;

        let rows = sqlx::query_as::<_, ListRow>(
            r#"
            SELECT d.id AS delivery_id,
                   d.recipient_id,
                   d.notification_id,
                   d.status,
                   d.read_at,
                   d.created_at AS delivery_created_at,
                   n.kind,
                   n.title,
                   n.content,
                   n.target_kind,
                   n.target_id,
                   n.metadata,
                   n.created_at AS notification_created_at
            FROM notification_deliveries d
            JOIN notifications n ON n.id = d.notification_id
            WHERE d.recipient_id = $1
            ORDER BY d.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(Uuid::from(recipient_id))
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter()
            .map(|row| {
                let status = match row.status.as_str() {
                    "unread" => DeliveryStatus::Unread,
                    "read" => DeliveryStatus::Read,
                    other => {
                        return Err(invalid_data(format!("unknown delivery status: {other}")))
                    }
                };
                let kind = NotificationKind::parse(&row.kind)
                    .map_err(|err| invalid_data(err.to_string()))?;

                let record = DeliveryRecord {
                    id: DeliveryId::from(row.delivery_id),
                    recipient_id: UserId::from(row.recipient_id),
                    notification_id: NotificationId::from(row.notification_id),
                    status,
                    read_at: row.read_at,
                    created_at: row.delivery_created_at,
                };
                let notification = Notification {
                    id: NotificationId::from(row.notification_id),
                    kind,
                    title: row.title,
                    content: row.content,
                    target_kind: row.target_kind,
                    target_id: row.target_id,
                    metadata: row.metadata,
                    created_at: row.notification_created_at,
                };
                Ok((record, notification))
            })
            .collect()
    }

    async fn unread_count(&self, recipient_id: UserId) -> Result<i64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM notification_deliveries
            WHERE recipient_id = $1 AND status = 'unread'
            "#,
        )
        .bind(Uuid::from(recipient_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(count)
    }

    async fn mark_read(
        &self,
        recipient_id: UserId,
        delivery_id: DeliveryId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET status = 'read', read_at = $3
            WHERE id = $1 AND recipient_id = $2 AND status = 'unread'
            "#,
        )
        .bind(Uuid::from(delivery_id))
        .bind(Uuid::from(recipient_id))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // 没有行被更新：区分"已经是已读"（幂等成功）和"记录不存在"
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM notification_deliveries
                WHERE id = $1 AND recipient_id = $2
            )
            "#,
        )
        .bind(Uuid::from(delivery_id))
        .bind(Uuid::from(recipient_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if exists {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn mark_all_read(&self, recipient_id: UserId) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE notification_deliveries
            SET status = 'read', read_at = $2
            WHERE recipient_id = $1 AND status = 'unread'
            "#,
        )
        .bind(Uuid::from(recipient_id))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected())
    }

    async fn delete(
        &self,
        recipient_id: UserId,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryRecord, RepositoryError> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            r#"
            DELETE FROM notification_deliveries
            WHERE id = $1 AND recipient_id = $2
            RETURNING id, recipient_id, notification_id, status, read_at, created_at
            "#,
        )
        .bind(Uuid::from(delivery_id))
        .bind(Uuid::from(recipient_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        DeliveryRecord::try_from(row)
    }
}

/// PostgreSQL实现的通知偏好存储
///
/// 没有设置行的 `(接收者, 类型)` 默认开启；推送总开关同理。
#[derive(Clone)]
pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn is_kind_enabled(
        &self,
        recipient_id: UserId,
        kind: NotificationKind,
    ) -> Result<bool, RepositoryError> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT enabled
            FROM notification_settings
            WHERE recipient_id = $1 AND kind = $2
            "#,
        )
        .bind(Uuid::from(recipient_id))
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(|(enabled,)| enabled).unwrap_or(true))
    }

    async fn is_push_enabled(&self, recipient_id: UserId) -> Result<bool, RepositoryError> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT push_enabled
            FROM notification_push_settings
            WHERE recipient_id = $1
            "#,
        )
        .bind(Uuid::from(recipient_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(|(enabled,)| enabled).unwrap_or(true))
    }
}
