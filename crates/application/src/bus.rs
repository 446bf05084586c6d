use async_trait::async_trait;
use domain::UserId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::dto::PushPayload;

/// 总线信封
///
/// 所有进程共享一个频道，每个接收者一条信封；订阅方自行过滤
/// 本进程持有连接的接收者。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub user_id: UserId,
    pub payload: PushPayload,
}

impl Envelope {
    pub fn new(user_id: UserId, payload: PushPayload) -> Self {
        Self { user_id, payload }
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus publish failed: {0}")]
    PublishFailed(String),
    #[error("bus subscribe failed: {0}")]
    SubscribeFailed(String),
}

impl BusError {
    pub fn publish_failed(message: impl Into<String>) -> Self {
        Self::PublishFailed(message.into())
    }

    pub fn subscribe_failed(message: impl Into<String>) -> Self {
        Self::SubscribeFailed(message.into())
    }
}

#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> Result<(), BusError>;
    async fn subscribe(&self) -> Result<BusStream, BusError>;
}

/// 订阅消息流
///
/// 统一本地广播通道与外部总线的接收端。`recv` 返回 `None`
/// 表示流已结束（总线关闭）。
pub struct BusStream {
    inner: BusStreamInner,
}

enum BusStreamInner {
    Broadcast(broadcast::Receiver<Envelope>),
    Channel(mpsc::UnboundedReceiver<Envelope>),
}

impl BusStream {
    pub fn from_broadcast(receiver: broadcast::Receiver<Envelope>) -> Self {
        Self {
            inner: BusStreamInner::Broadcast(receiver),
        }
    }

    pub fn from_channel(receiver: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            inner: BusStreamInner::Channel(receiver),
        }
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        match &mut self.inner {
            BusStreamInner::Broadcast(receiver) => loop {
                match receiver.recv().await {
                    Ok(envelope) => return Some(envelope),
                    // 慢消费者丢失了若干消息：持久存储兜底，继续接收
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "bus stream lagged, dropping missed envelopes");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            BusStreamInner::Channel(receiver) => receiver.recv().await,
        }
    }
}

/// 进程内总线实现
///
/// 单进程部署与测试使用；也是外部总线不可用时的降级路径。
#[derive(Clone)]
pub struct LocalNotificationBus {
    sender: broadcast::Sender<Envelope>,
}

impl LocalNotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for LocalNotificationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl NotificationBus for LocalNotificationBus {
    async fn publish(&self, envelope: Envelope) -> Result<(), BusError> {
        if self.sender.receiver_count() == 0 {
            return Ok(());
        }
        self.sender
            .send(envelope)
            .map_err(|err| BusError::publish_failed(err.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<BusStream, BusError> {
        Ok(BusStream::from_broadcast(self.sender.subscribe()))
    }
}
