use application::bus::{BusError, BusStream, Envelope, NotificationBus};
use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicU64, AtomicU8, Ordering},
    Arc, Mutex,
};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

/// 断路器状态
#[derive(Debug, Clone, Copy, PartialEq)]
enum CircuitState {
    Closed = 0,   // 正常状态，允许请求通过
    Open = 1,     // 断开状态，直接走本地降级
    HalfOpen = 2, // 半开状态，允许少量请求测试服务是否恢复
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // 默认为断开状态
        }
    }
}

/// 断路器配置
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    failure_threshold: u64,   // 失败阈值
    success_threshold: u64,   // 成功阈值（半开状态下）
    timeout: Duration,        // 断开后重新试探的冷却时间
    half_open_max_calls: u64, // 半开状态下最大尝试次数
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

/// 断路器统计信息
#[derive(Debug)]
struct CircuitMetrics {
    failure_count: AtomicU64,
    success_count: AtomicU64,
    last_failure_time: Mutex<Option<Instant>>,
    half_open_calls: AtomicU64,
}

impl CircuitMetrics {
    fn new() -> Self {
        Self {
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            last_failure_time: Mutex::new(None),
            half_open_calls: AtomicU64::new(0),
        }
    }

    fn reset(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.half_open_calls.store(0, Ordering::Relaxed);
        *self.last_failure_time.lock().unwrap() = None;
    }
}

/// 断路器总线：三状态机保护外部总线
/// CLOSED（正常）→ OPEN（故障，发布降级为本进程内广播）→ HALF_OPEN（测试恢复）→ CLOSED
///
/// 外部总线长期不可用时不做缓冲重放：发布退化为本地广播，本进程
/// 自己的连接仍然收到实时推送，其余进程靠持久存储在下次拉取时补齐。
pub struct FallbackNotificationBus {
    remote: Arc<dyn NotificationBus>,
    local: Arc<dyn NotificationBus>,
    state: AtomicU8, // 使用 u8 表示 CircuitState
    config: CircuitConfig,
    metrics: CircuitMetrics,
}

impl FallbackNotificationBus {
    pub fn new(remote: Arc<dyn NotificationBus>, local: Arc<dyn NotificationBus>) -> Self {
        Self {
            remote,
            local,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config: CircuitConfig::default(),
            metrics: CircuitMetrics::new(),
        }
    }

    /// 获取当前断路器状态
    fn current_state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Relaxed))
    }

    /// 安全地转换状态并记录日志
    fn transition_to(&self, new_state: CircuitState) {
        let old_state = self.current_state();
        if old_state != new_state {
            self.state.store(new_state as u8, Ordering::Relaxed);

            match new_state {
                CircuitState::Closed => {
                    self.metrics.reset();
                    info!(
                        "Circuit breaker: {:?} → CLOSED (Normal operation)",
                        old_state
                    );
                }
                CircuitState::Open => {
                    *self.metrics.last_failure_time.lock().unwrap() = Some(Instant::now());
                    error!(
                        "Circuit breaker: {:?} → OPEN (Bus unavailable, using local fallback only)",
                        old_state
                    );
                }
                CircuitState::HalfOpen => {
                    self.metrics.half_open_calls.store(0, Ordering::Relaxed);
                    warn!(
                        "Circuit breaker: {:?} → HALF_OPEN (Testing bus recovery)",
                        old_state
                    );
                }
            }
        }
    }

    /// 记录成功操作
    fn record_success(&self) {
        match self.current_state() {
            CircuitState::Closed => {
                // 在正常状态下，重置失败计数
                self.metrics.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                let success_count = self.metrics.success_count.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    "Circuit breaker: Success in HALF_OPEN state ({}/{})",
                    success_count, self.config.success_threshold
                );

                if success_count >= self.config.success_threshold {
                    self.transition_to(CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                warn!("Circuit breaker: Unexpected success in OPEN state");
            }
        }
    }

    /// 记录失败操作
    fn record_failure(&self) {
        match self.current_state() {
            CircuitState::Closed => {
                let failure_count = self.metrics.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Circuit breaker: Failure in CLOSED state ({}/{})",
                    failure_count, self.config.failure_threshold
                );

                if failure_count >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                error!("Circuit breaker: Failure in HALF_OPEN state, reopening circuit");
                self.transition_to(CircuitState::Open);
            }
            CircuitState::Open => {
                *self.metrics.last_failure_time.lock().unwrap() = Some(Instant::now());
            }
        }
    }

    /// 检查是否可以尝试外部总线
    fn can_attempt_request(&self) -> bool {
        match self.current_state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                // 冷却期过后转为半开状态试探恢复
                if let Some(last_failure) = *self.metrics.last_failure_time.lock().unwrap() {
                    if last_failure.elapsed() >= self.config.timeout {
                        self.transition_to(CircuitState::HalfOpen);
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => {
                let current_calls = self.metrics.half_open_calls.fetch_add(1, Ordering::Relaxed);
                current_calls < self.config.half_open_max_calls
            }
        }
    }
}

#[async_trait]
impl NotificationBus for FallbackNotificationBus {
    /// 断路器保护的发布操作
    ///
    /// - CLOSED: 发到外部总线，失败则计数，达到阈值转OPEN
    /// - OPEN: 冷却期内直接本地广播，冷却期满转HALF_OPEN试探
    /// - HALF_OPEN: 限量尝试外部总线，成功则转CLOSED，失败则转OPEN
    async fn publish(&self, envelope: Envelope) -> Result<(), BusError> {
        if !self.can_attempt_request() {
            return self.local.publish(envelope).await;
        }

        match self.remote.publish(envelope.clone()).await {
            Ok(()) => {
                self.record_success();
                Ok(())
            }
            Err(err) => {
                self.record_failure();
                // 外部总线失败：降级为本进程内广播，本地连接不受影响
                info!(error = %err, "remote bus publish failed, using local fallback");
                self.local.publish(envelope).await
            }
        }
    }

    /// 合并订阅：本地降级流始终在线，外部总线流可用时并入
    ///
    /// 发布侧对每条信封只会选择一条路径（外部或本地），
    /// 合并订阅不会产生重复投递。
    async fn subscribe(&self) -> Result<BusStream, BusError> {
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut local_stream = self.local.subscribe().await?;
        let local_sender = sender.clone();
        tokio::spawn(async move {
            while let Some(envelope) = local_stream.recv().await {
                if local_sender.send(envelope).is_err() {
                    break;
                }
            }
        });

        match self.remote.subscribe().await {
            Ok(mut remote_stream) => {
                tokio::spawn(async move {
                    while let Some(envelope) = remote_stream.recv().await {
                        if sender.send(envelope).is_err() {
                            break;
                        }
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "remote bus subscribe failed, local-only dispatch");
            }
        }

        Ok(BusStream::from_channel(receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::bus::LocalNotificationBus;
    use application::dto::PushPayload;
    use domain::{DeliveryRecord, Notification, NotificationKind, UserId};
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    /// 总是失败的总线，统计发布尝试次数
    struct BrokenBus {
        attempts: AtomicUsize,
    }

    impl BrokenBus {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NotificationBus for BrokenBus {
        async fn publish(&self, _envelope: Envelope) -> Result<(), BusError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(BusError::publish_failed("connection refused"))
        }

        async fn subscribe(&self) -> Result<BusStream, BusError> {
            Err(BusError::subscribe_failed("connection refused"))
        }
    }

    fn test_envelope() -> Envelope {
        let user_id = UserId::new(Uuid::new_v4());
        let notification = Notification::new(NotificationKind::Mention, "提及", "x");
        let record = DeliveryRecord::new(user_id, notification.id);
        Envelope::new(user_id, PushPayload::from_parts(&notification, &record))
    }

    #[tokio::test]
    async fn test_publish_falls_back_to_local_on_failure() {
        let remote = BrokenBus::new();
        let local = Arc::new(LocalNotificationBus::new(16));
        let bus = FallbackNotificationBus::new(remote.clone(), local.clone());

        let mut stream = bus.subscribe().await.unwrap();

        let envelope = test_envelope();
        bus.publish(envelope.clone()).await.unwrap();

        // 信封通过本地降级路径到达订阅者
        let received = tokio::time::timeout(Duration::from_secs(1), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.user_id, envelope.user_id);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_repeated_failures() {
        let remote = BrokenBus::new();
        let local = Arc::new(LocalNotificationBus::new(16));
        let bus = FallbackNotificationBus::new(remote.clone(), local);

        // 连续失败打满阈值
        for _ in 0..5 {
            bus.publish(test_envelope()).await.unwrap();
        }
        assert_eq!(bus.current_state(), CircuitState::Open);

        let attempts_when_open = remote.attempts.load(Ordering::SeqCst);

        // 断开状态下发布不再触碰外部总线
        bus.publish(test_envelope()).await.unwrap();
        bus.publish(test_envelope()).await.unwrap();
        assert_eq!(remote.attempts.load(Ordering::SeqCst), attempts_when_open);
    }
}
