//! 通知查询服务
//!
//! CRUD 层消费的持久查询表面：列表（第一页缓存优先）、未读计数
//! （缓存优先、未命中回源重算）、已读/全部已读/删除。缓存对这里
//! 永远只是加速器，任何缓存失败都降级到持久存储。

use std::sync::Arc;
use std::time::Duration;

use config::CacheConfig;
use domain::{DeliveryId, UserId};
use tracing::{debug, warn};

use crate::cache::NotificationCache;
use crate::dto::{NotificationDto, UnreadCountDto};
use crate::error::ApplicationResult;
use crate::repository::NotificationRepository;

pub struct NotificationQueryServiceDependencies {
    pub repository: Arc<dyn NotificationRepository>,
    pub cache: Arc<dyn NotificationCache>,
    pub cache_config: CacheConfig,
}

pub struct NotificationQueryService {
    repository: Arc<dyn NotificationRepository>,
    cache: Arc<dyn NotificationCache>,
    unread_ttl: Duration,
    recent_ttl: Duration,
    recent_cap: usize,
}

impl NotificationQueryService {
    pub fn new(deps: NotificationQueryServiceDependencies) -> Self {
        Self {
            repository: deps.repository,
            cache: deps.cache,
            unread_ttl: Duration::from_secs(deps.cache_config.unread_ttl_secs),
            recent_ttl: Duration::from_secs(deps.cache_config.recent_ttl_secs),
            recent_cap: deps.cache_config.recent_list_cap,
        }
    }

    /// 分页列出通知，第一页优先从最近列表缓存读取
    pub async fn list(
        &self,
        recipient_id: UserId,
        page: u32,
        per_page: u32,
    ) -> ApplicationResult<Vec<NotificationDto>> {
        let page = page.max(1);

        if page == 1 && (per_page as usize) <= self.recent_cap {
            match self.cache.recent(recipient_id).await {
                Ok(cached) if !cached.is_empty() => {
                    let dtos: Vec<NotificationDto> = cached
                        .iter()
                        .filter_map(|raw| serde_json::from_str::<NotificationDto>(raw).ok())
                        .take(per_page as usize)
                        .collect();

                    if !dtos.is_empty() {
                        debug!(recipient_id = %recipient_id, "serving first page from cache");
                        return Ok(dtos);
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(recipient_id = %recipient_id, error = %err, "recent list unavailable");
                }
            }
        }

        let rows = self
            .repository
            .list_for_recipient(recipient_id, page, per_page)
            .await?;
        let dtos: Vec<NotificationDto> = rows
            .iter()
            .map(|(record, notification)| NotificationDto::from_row(record, notification))
            .collect();

        // 第一页回填缓存视图（逆序压入，保持最新在前）
        if page == 1 {
            for (record, notification) in rows.iter().rev() {
                let dto = NotificationDto::from_row(record, notification);
                if let Ok(serialized) = serde_json::to_string(&dto) {
                    if let Err(err) = self
                        .cache
                        .push_recent(recipient_id, &serialized, self.recent_cap, self.recent_ttl)
                        .await
                    {
                        warn!(recipient_id = %recipient_id, error = %err, "failed to repopulate recent list");
                        break;
                    }
                }
            }
        }

        Ok(dtos)
    }

    /// 未读计数：缓存优先，未命中回源重算并回填
    ///
    /// 缓存值从不当作权威数据，读不到就以持久层重新计数为准。
    pub async fn unread_count(&self, recipient_id: UserId) -> ApplicationResult<UnreadCountDto> {
        match self.cache.get_unread(recipient_id).await {
            Ok(Some(count)) => return Ok(UnreadCountDto { unread: count.max(0) }),
            Ok(None) => {}
            Err(err) => {
                warn!(recipient_id = %recipient_id, error = %err, "unread cache unavailable");
            }
        }

        let count = self.repository.unread_count(recipient_id).await?;
        if let Err(err) = self
            .cache
            .set_unread(recipient_id, count, self.unread_ttl)
            .await
        {
            warn!(recipient_id = %recipient_id, error = %err, "failed to backfill unread counter");
        }

        Ok(UnreadCountDto { unread: count })
    }

    /// 标记单条已读
    pub async fn mark_read(
        &self,
        recipient_id: UserId,
        delivery_id: DeliveryId,
    ) -> ApplicationResult<()> {
        let was_unread = self.repository.mark_read(recipient_id, delivery_id).await?;

        if was_unread {
            if let Err(err) = self.cache.decr_unread(recipient_id, self.unread_ttl).await {
                warn!(recipient_id = %recipient_id, error = %err, "failed to decrement unread counter");
            }
        }
        self.invalidate_recent(recipient_id).await;

        Ok(())
    }

    /// 全部标记已读
    pub async fn mark_all_read(&self, recipient_id: UserId) -> ApplicationResult<u64> {
        let updated = self.repository.mark_all_read(recipient_id).await?;

        if let Err(err) = self.cache.set_unread(recipient_id, 0, self.unread_ttl).await {
            warn!(recipient_id = %recipient_id, error = %err, "failed to reset unread counter");
        }
        self.invalidate_recent(recipient_id).await;

        Ok(updated)
    }

    /// 删除投递记录（共享的通知本体不受影响）
    pub async fn delete(
        &self,
        recipient_id: UserId,
        delivery_id: DeliveryId,
    ) -> ApplicationResult<()> {
        let removed = self.repository.delete(recipient_id, delivery_id).await?;

        if removed.is_unread() {
            if let Err(err) = self.cache.decr_unread(recipient_id, self.unread_ttl).await {
                warn!(recipient_id = %recipient_id, error = %err, "failed to decrement unread counter");
            }
        }
        self.invalidate_recent(recipient_id).await;

        Ok(())
    }

    /// 读状态变更后让缓存视图失效，下次列表查询回源重建
    async fn invalidate_recent(&self, recipient_id: UserId) {
        if let Err(err) = self.cache.clear_recent(recipient_id).await {
            warn!(recipient_id = %recipient_id, error = %err, "failed to invalidate recent list");
        }
    }
}
