//! 事件处理服务
//!
//! 领域事件的入口。`publish_event` 只做入队并立即返回，触发方
//! （发评论、点赞）的成功与通知处理的成败完全解耦。队列由一组
//! 工作者并发消费；任何处理失败都在这里落日志并终止，绝不抛回
//! 事件发布方。

use std::sync::Arc;

use domain::{DomainEvent, Notification, UserId};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregation::AggregationEngine;
use crate::delivery::DeliveryOrchestrator;
use crate::render::render_event;
use crate::repository::{NotificationRepository, SettingsStore};

pub struct NotificationServiceDependencies {
    pub repository: Arc<dyn NotificationRepository>,
    pub settings: Arc<dyn SettingsStore>,
    pub aggregation: Arc<AggregationEngine>,
    pub orchestrator: Arc<DeliveryOrchestrator>,
    pub worker_config: config::WorkerConfig,
}

/// 事件翻译与分发的核心：每个入站事件经过校验、按接收者做偏好
/// 过滤，然后要么进聚合桶、要么直接生成通知。
struct EventHandler {
    repository: Arc<dyn NotificationRepository>,
    settings: Arc<dyn SettingsStore>,
    aggregation: Arc<AggregationEngine>,
    orchestrator: Arc<DeliveryOrchestrator>,
}

impl EventHandler {
    /// 处理单个事件；所有失败在这里终结
    async fn handle(&self, event: DomainEvent) {
        if let Err(err) = event.validate() {
            warn!(event_type = event.event_type(), error = %err, "dropping invalid event");
            return;
        }

        let kind = event.kind();
        let mut enabled_recipients = Vec::new();
        for recipient_id in event.recipients() {
            match self.settings.is_kind_enabled(recipient_id, kind).await {
                Ok(true) => enabled_recipients.push(recipient_id),
                Ok(false) => {
                    // 该类型被接收者关闭：静默丢弃，无任何副作用
                    debug!(
                        recipient_id = %recipient_id,
                        kind = kind.as_str(),
                        "notification kind disabled, dropping"
                    );
                }
                Err(err) => {
                    // 设置查询失败属于配置类失败：跳过该接收者，不重试
                    warn!(
                        recipient_id = %recipient_id,
                        error = %err,
                        "settings lookup failed, skipping recipient"
                    );
                }
            }
        }

        if enabled_recipients.is_empty() {
            return;
        }

        if event.is_aggregatable() {
            for recipient_id in enabled_recipients {
                if let Err(err) = self.aggregation.add_event(&event, recipient_id).await {
                    error!(
                        event_type = event.event_type(),
                        recipient_id = %recipient_id,
                        error = %err,
                        "failed to buffer event for aggregation"
                    );
                }
            }
            return;
        }

        self.create_direct(&event, &enabled_recipients).await;
    }

    /// 非聚合事件：直接落库并投递
    async fn create_direct(&self, event: &DomainEvent, recipients: &[UserId]) {
        let (title, content) = render_event(event);
        let mut notification = Notification::new(event.kind(), title, content);
        if let Some(target) = event.target() {
            notification = notification.with_target(target.kind.clone(), target.id.clone());
        }

        let records = match self
            .repository
            .create(notification.clone(), recipients)
            .await
        {
            Ok(records) => records,
            Err(err) => {
                error!(
                    event_type = event.event_type(),
                    error = %err,
                    "failed to persist notification"
                );
                return;
            }
        };

        self.orchestrator.deliver(&notification, &records).await;
    }
}

pub struct NotificationService {
    queue_tx: mpsc::Sender<DomainEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl NotificationService {
    /// 创建服务并启动工作者池
    pub fn spawn(deps: NotificationServiceDependencies) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(deps.worker_config.queue_capacity.max(1));
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let handler = Arc::new(EventHandler {
            repository: deps.repository,
            settings: deps.settings,
            aggregation: deps.aggregation,
            orchestrator: deps.orchestrator,
        });

        let pool_size = deps.worker_config.pool_size.max(1);
        let mut workers = Vec::with_capacity(pool_size);
        for worker_id in 0..pool_size {
            let handler = Arc::clone(&handler);
            let queue_rx = Arc::clone(&queue_rx);

            workers.push(tokio::spawn(async move {
                loop {
                    let event = { queue_rx.lock().await.recv().await };
                    match event {
                        Some(event) => handler.handle(event).await,
                        None => break,
                    }
                }
                debug!(worker_id, "event worker stopped");
            }));
        }

        info!(pool_size, "event workers started");
        Self { queue_tx, workers }
    }

    /// 发布领域事件：只入队，立即返回
    ///
    /// 队列满时丢弃事件（持久层之外本来就不承诺投递低信号事件），
    /// 绝不阻塞调用方。
    pub fn publish_event(&self, event: DomainEvent) {
        match self.queue_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    event_type = event.event_type(),
                    "event queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(
                    event_type = event.event_type(),
                    "event queue closed, dropping event"
                );
            }
        }
    }

    /// 关闭：停止接收新事件并等待队列中剩余事件处理完
    pub async fn shutdown(self) {
        drop(self.queue_tx);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
