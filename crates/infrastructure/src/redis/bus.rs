//! Redis 发布订阅总线
//!
//! 所有进程共享一个频道：发布方每个接收者发一条信封，订阅方收到
//! 全量信封后按本地连接过滤。订阅循环支持自动重连，带指数退避。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use application::bus::{BusError, BusStream, Envelope, NotificationBus};
use async_trait::async_trait;
use config::RedisConfig;
use futures_util::stream::StreamExt;
use redis::Client;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

pub struct RedisNotificationBus {
    redis_client: Arc<Client>,
    channel: String,
    reconnect_interval_ms: u64,
    max_reconnect_attempts: u32,
    shutdown_signal: Arc<AtomicBool>,
}

impl RedisNotificationBus {
    pub fn new(redis_client: Arc<Client>, channel: impl Into<String>, config: &RedisConfig) -> Self {
        Self {
            redis_client,
            channel: channel.into(),
            reconnect_interval_ms: config.reconnect_interval_ms,
            max_reconnect_attempts: config.max_reconnect_attempts,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 优雅关闭订阅循环
    pub fn shutdown(&self) {
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }

    /// 订阅监听循环
    ///
    /// 连接断开后按指数退避重连；达到最大重试次数后放弃。实时
    /// 路径失效期间持久存储不受影响，客户端下次拉取仍能看到通知。
    async fn listen_loop(
        client: Arc<Client>,
        channel: String,
        sender: mpsc::UnboundedSender<Envelope>,
        shutdown_signal: Arc<AtomicBool>,
        reconnect_interval_ms: u64,
        max_reconnect_attempts: u32,
    ) {
        let mut retry_count = 0u32;

        while !shutdown_signal.load(Ordering::Relaxed) {
            match Self::subscribe_and_listen(&client, &channel, &sender, &shutdown_signal).await {
                Ok(()) => {
                    info!("Redis 订阅循环正常退出");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "Redis 订阅循环错误");
                    retry_count += 1;

                    if retry_count >= max_reconnect_attempts {
                        error!("连接失败，已达最大重试次数，实时推送路径停用");
                        break;
                    }

                    let delay = Duration::from_millis(
                        reconnect_interval_ms * (2_u64.pow(retry_count - 1)),
                    );
                    sleep(delay).await;
                }
            }
        }

        info!("Redis 订阅循环已停止");
    }

    async fn subscribe_and_listen(
        client: &Client,
        channel: &str,
        sender: &mpsc::UnboundedSender<Envelope>,
        shutdown_signal: &Arc<AtomicBool>,
    ) -> Result<(), BusError> {
        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::subscribe_failed(format!("获取 PubSub 连接失败: {e}")))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| BusError::subscribe_failed(format!("订阅频道 {channel} 失败: {e}")))?;

        info!(channel, "已订阅通知频道");

        loop {
            if shutdown_signal.load(Ordering::Relaxed) {
                return Ok(());
            }

            // 使用超时避免无限阻塞，周期性检查关闭信号
            match tokio::time::timeout(Duration::from_millis(1000), async {
                pubsub.on_message().next().await
            })
            .await
            {
                Ok(Some(msg)) => {
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(err) => {
                            error!(error = %err, "获取消息负载失败");
                            continue;
                        }
                    };

                    match serde_json::from_str::<Envelope>(&payload) {
                        Ok(envelope) => {
                            if sender.send(envelope).is_err() {
                                // 接收端已关闭（分发循环退出）
                                warn!("订阅流接收端已关闭，停止监听");
                                return Ok(());
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "反序列化总线信封失败，丢弃消息");
                        }
                    }
                }
                Ok(None) => {
                    return Err(BusError::subscribe_failed("消息流意外结束"));
                }
                Err(_) => {
                    // 超时，继续循环检查信号
                    continue;
                }
            }
        }
    }
}

#[async_trait]
impl NotificationBus for RedisNotificationBus {
    async fn publish(&self, envelope: Envelope) -> Result<(), BusError> {
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| BusError::publish_failed(format!("序列化信封失败: {e}")))?;

        let mut conn = self
            .redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BusError::publish_failed(format!("Redis connection failed: {e}")))?;

        let subscriber_count: u32 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::publish_failed(format!("发布失败: {e}")))?;

        debug!(
            channel = %self.channel,
            subscriber_count,
            "envelope published"
        );
        Ok(())
    }

    async fn subscribe(&self) -> Result<BusStream, BusError> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let client = Arc::clone(&self.redis_client);
        let channel = self.channel.clone();
        let shutdown_signal = Arc::clone(&self.shutdown_signal);
        let reconnect_interval_ms = self.reconnect_interval_ms;
        let max_reconnect_attempts = self.max_reconnect_attempts;

        // 监听循环在后台任务中运行，流的生命周期与接收端绑定
        tokio::spawn(async move {
            Self::listen_loop(
                client,
                channel,
                sender,
                shutdown_signal,
                reconnect_interval_ms,
                max_reconnect_attempts,
            )
            .await;
        });

        Ok(BusStream::from_channel(receiver))
    }
}

impl Drop for RedisNotificationBus {
    fn drop(&mut self) {
        self.shutdown_signal.store(true, Ordering::Relaxed);
    }
}
