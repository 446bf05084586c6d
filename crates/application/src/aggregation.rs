//! 聚合引擎
//!
//! 把同类事件的爆发收敛成一条面向用户的通知。原始事件按
//! `(类型, 目标, 接收者)` 进入时间窗桶，周期扫描把达到阈值的桶
//! 折叠为一条聚合通知；始终没达到阈值的桶随TTL静默过期。这是
//! 刻意的低信号事件抑制，不是投递保证。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use config::AggregationConfig;
use domain::{BucketKey, DomainEvent, Notification, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::NotificationCache;
use crate::delivery::DeliveryOrchestrator;
use crate::error::ApplicationResult;
use crate::render::render_aggregated;
use crate::repository::NotificationRepository;

/// 扫描锁的名字，同一总线上至多一个活跃扫描者
const SWEEP_LOCK: &str = "agg:sweep:lock";

/// 桶内的原始事件标记
///
/// nonce 保证集合语义下同一演员的多次事件不去重。
#[derive(Debug, Serialize, Deserialize)]
struct EventMarker {
    actor_id: Option<UserId>,
    target_kind: Option<String>,
    occurred_at: DateTime<Utc>,
    nonce: Uuid,
}

pub struct AggregationEngineDependencies {
    pub cache: Arc<dyn NotificationCache>,
    pub repository: Arc<dyn NotificationRepository>,
    pub orchestrator: Arc<DeliveryOrchestrator>,
    pub config: AggregationConfig,
}

pub struct AggregationEngine {
    cache: Arc<dyn NotificationCache>,
    repository: Arc<dyn NotificationRepository>,
    orchestrator: Arc<DeliveryOrchestrator>,
    config: AggregationConfig,
}

impl AggregationEngine {
    pub fn new(deps: AggregationEngineDependencies) -> Self {
        Self {
            cache: deps.cache,
            repository: deps.repository,
            orchestrator: deps.orchestrator,
            config: deps.config,
        }
    }

    /// 把一个可聚合事件追加到接收者对应的桶，刷新桶的TTL
    pub async fn add_event(&self, event: &DomainEvent, recipient_id: UserId) -> ApplicationResult<()> {
        let target = event
            .target()
            .ok_or_else(|| domain::DomainError::invalid_event("aggregatable event without target"))?;

        let key = BucketKey::new(event.kind(), target.id.clone(), recipient_id);
        let marker = EventMarker {
            actor_id: actor_of(event),
            target_kind: Some(target.kind.clone()),
            occurred_at: event.occurred_at(),
            nonce: Uuid::new_v4(),
        };
        let marker = serde_json::to_string(&marker)
            .map_err(|err| crate::cache::CacheError::command(err.to_string()))?;

        self.cache
            .bucket_append(
                &key.encode(),
                &marker,
                Duration::from_secs(self.config.bucket_ttl_secs),
            )
            .await?;

        debug!(bucket = %key, "event buffered for aggregation");
        Ok(())
    }

    /// 周期扫描：把达到阈值的桶折叠为聚合通知
    ///
    /// 多进程部署下通过分布式锁保证一轮只有一个活跃扫描者；
    /// 即便锁失效导致并发扫描，`bucket_take` 的原子删除也保证
    /// 每个桶至多被消费一次。单个坏桶只影响自己，不中断整轮扫描。
    ///
    /// 返回本轮创建的聚合通知数。
    pub async fn sweep(&self) -> usize {
        match self
            .cache
            .try_lock(
                SWEEP_LOCK,
                Duration::from_secs(self.config.sweep_lock_ttl_secs),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("another sweeper holds the lock, skipping this pass");
                return 0;
            }
            Err(err) => {
                warn!(error = %err, "sweep lock unavailable, skipping this pass");
                return 0;
            }
        }

        let keys = match self.cache.bucket_keys().await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(error = %err, "failed to enumerate buckets");
                return 0;
            }
        };

        let mut created = 0;
        for raw_key in keys {
            match self.sweep_bucket(&raw_key).await {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(err) => {
                    // 单个桶的失败不阻断整轮扫描
                    warn!(bucket = %raw_key, error = %err, "failed to sweep bucket");
                }
            }
        }

        if created > 0 {
            info!(created, "aggregation sweep finished");
        }
        created
    }

    /// 处理单个桶；返回是否产出了聚合通知
    async fn sweep_bucket(&self, raw_key: &str) -> ApplicationResult<bool> {
        let key = match BucketKey::parse(raw_key) {
            Ok(key) => key,
            Err(err) => {
                warn!(bucket = %raw_key, error = %err, "skipping malformed bucket key");
                return Ok(false);
            }
        };

        let count = self.cache.bucket_count(raw_key).await?;
        if count == 0 {
            // 已过期或已被消费
            return Ok(false);
        }

        let threshold = self.config.min_count_for(key.kind.as_str()) as u64;
        if count < threshold {
            // 没达到阈值：留给未来的扫描，不重置TTL
            debug!(bucket = %raw_key, count, threshold, "bucket below threshold");
            return Ok(false);
        }

        let Some(markers) = self.cache.bucket_take(raw_key).await? else {
            // 另一个扫描者刚刚消费了这个桶
            debug!(bucket = %raw_key, "bucket already consumed");
            return Ok(false);
        };

        let count = markers.len();
        let target_kind = markers
            .iter()
            .find_map(|marker| serde_json::from_str::<EventMarker>(marker).ok())
            .and_then(|marker| marker.target_kind);

        let (title, content) = render_aggregated(key.kind, count);
        let mut notification = Notification::new(key.kind, title, content);
        if let Some(target_kind) = target_kind {
            notification = notification.with_target(target_kind, key.target_id.clone());
        }
        notification.add_metadata_field("count", serde_json::json!(count));

        let records = match self
            .repository
            .create(notification.clone(), &[key.recipient_id])
            .await
        {
            Ok(records) => records,
            Err(err) => {
                error!(bucket = %raw_key, error = %err, "failed to persist aggregated notification");
                return Err(err.into());
            }
        };

        self.orchestrator.deliver(&notification, &records).await;
        Ok(true)
    }
}

fn actor_of(event: &DomainEvent) -> Option<UserId> {
    match event {
        DomainEvent::Mention { actor_id, .. }
        | DomainEvent::PostLiked { actor_id, .. }
        | DomainEvent::PostCommented { actor_id, .. }
        | DomainEvent::ChatMessage { actor_id, .. } => Some(*actor_id),
        DomainEvent::BlogApproved { .. }
        | DomainEvent::AchievementUnlocked { .. }
        | DomainEvent::SystemAnnouncement { .. } => None,
    }
}
