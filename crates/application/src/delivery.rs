//! 投递编排器
//!
//! 通知创建后的胶水层：更新缓存视图（未读计数、最近列表）、
//! 向共享总线发布信封、并把信封转发给本进程持有的在线连接。
//! 总线路径只是延迟优化：持久化先于扇出完成，没有任何在线
//! 连接时通知依然在下次拉取时可见。

use std::sync::Arc;
use std::time::Duration;

use config::CacheConfig;
use domain::{DeliveryRecord, Notification};
use tracing::{debug, info, warn};

use crate::bus::{Envelope, NotificationBus};
use crate::cache::NotificationCache;
use crate::dto::PushPayload;
use crate::registry::ConnectionRegistry;
use crate::repository::SettingsStore;

pub struct DeliveryOrchestratorDependencies {
    pub cache: Arc<dyn NotificationCache>,
    pub bus: Arc<dyn NotificationBus>,
    pub registry: Arc<ConnectionRegistry>,
    pub settings: Arc<dyn SettingsStore>,
    pub cache_config: CacheConfig,
}

pub struct DeliveryOrchestrator {
    cache: Arc<dyn NotificationCache>,
    bus: Arc<dyn NotificationBus>,
    registry: Arc<ConnectionRegistry>,
    settings: Arc<dyn SettingsStore>,
    unread_ttl: Duration,
    recent_ttl: Duration,
    recent_cap: usize,
}

impl DeliveryOrchestrator {
    pub fn new(deps: DeliveryOrchestratorDependencies) -> Self {
        Self {
            cache: deps.cache,
            bus: deps.bus,
            registry: deps.registry,
            settings: deps.settings,
            unread_ttl: Duration::from_secs(deps.cache_config.unread_ttl_secs),
            recent_ttl: Duration::from_secs(deps.cache_config.recent_ttl_secs),
            recent_cap: deps.cache_config.recent_list_cap,
        }
    }

    /// 投递一条已持久化的通知
    ///
    /// 这里的失败都不向上传播：缓存不可用时降级（持久计数兜底），
    /// 总线发布失败时退化为只投递本进程自己的连接。
    pub async fn deliver(&self, notification: &Notification, records: &[DeliveryRecord]) {
        for record in records {
            let recipient_id = record.recipient_id;
            let payload = PushPayload::from_parts(notification, record);

            if let Err(err) = self.cache.incr_unread(recipient_id, self.unread_ttl).await {
                warn!(recipient_id = %recipient_id, error = %err, "failed to bump unread counter");
            }

            // 最近列表缓存查询形态的 DTO，读状态变更时由查询服务整体失效
            match serde_json::to_string(&crate::dto::NotificationDto::from_row(record, notification)) {
                Ok(serialized) => {
                    if let Err(err) = self
                        .cache
                        .push_recent(recipient_id, &serialized, self.recent_cap, self.recent_ttl)
                        .await
                    {
                        warn!(recipient_id = %recipient_id, error = %err, "failed to push recent list");
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to serialize push payload");
                }
            }

            // 推送总开关关闭的接收者：持久记录和计数已就绪，跳过实时路径
            match self.settings.is_push_enabled(recipient_id).await {
                Ok(false) => {
                    debug!(recipient_id = %recipient_id, "push disabled, skipping realtime path");
                    continue;
                }
                Ok(true) => {}
                Err(err) => {
                    // 设置查不到时按默认开启处理
                    warn!(recipient_id = %recipient_id, error = %err, "push settings lookup failed");
                }
            }

            let envelope = Envelope::new(recipient_id, payload);
            if let Err(err) = self.bus.publish(envelope.clone()).await {
                warn!(
                    recipient_id = %recipient_id,
                    error = %err,
                    "bus publish failed, falling back to local dispatch"
                );
                self.dispatch_local(&envelope);
            }
        }
    }

    /// 把信封转发给本进程持有的该接收者的全部连接
    ///
    /// 每个连接一次尽力而为的发送尝试（at-most-once）。发送在独立
    /// 任务里进行，慢客户端不会阻塞总线分发循环；发送失败的连接
    /// 立即从注册表移除。
    pub fn dispatch_local(&self, envelope: &Envelope) {
        let recipient_id = envelope.user_id;
        let connections = self.registry.connections_for(recipient_id);
        if connections.is_empty() {
            return;
        }

        for connection in connections {
            let registry = Arc::clone(&self.registry);
            let payload = envelope.payload.clone();

            tokio::spawn(async move {
                let connection_id = connection.id();
                if let Err(err) = connection.send(&payload).await {
                    warn!(
                        recipient_id = %recipient_id,
                        connection_id = %connection_id,
                        error = %err,
                        "send failed, removing connection"
                    );
                    registry.remove(recipient_id, connection_id);
                    connection.close().await;
                }
            });
        }
    }

    /// 启动总线分发循环
    ///
    /// 每个进程恰好一个：接收共享频道上的所有信封，过滤出本进程
    /// 持有连接的接收者并转发。
    pub fn spawn_dispatcher(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = self;
        tokio::spawn(async move {
            let mut stream = match orchestrator.bus.subscribe().await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "bus subscribe failed, realtime dispatch disabled");
                    return;
                }
            };

            info!("bus dispatcher started");
            while let Some(envelope) = stream.recv().await {
                orchestrator.dispatch_local(&envelope);
            }
            info!("bus dispatcher stopped");
        })
    }
}
