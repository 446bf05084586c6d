//! 集成测试共用的装配与假连接
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use application::cache::memory::MemoryNotificationCache;
use application::dto::PushPayload;
use application::repository::memory::{MemoryNotificationStore, MemorySettingsStore};
use application::transport::{TransportConnection, TransportError};
use application::{
    AggregationEngine, AggregationEngineDependencies, ConnectionRegistry, DeliveryOrchestrator,
    DeliveryOrchestratorDependencies, LocalNotificationBus, NotificationBus,
    NotificationQueryService, NotificationQueryServiceDependencies, NotificationService,
    NotificationServiceDependencies,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ConnectionId, TransportKind, UserId};
use tokio::sync::Mutex;
use uuid::Uuid;

pub fn cache_config() -> config::CacheConfig {
    config::CacheConfig {
        unread_ttl_secs: 3600,
        recent_list_cap: 10,
        recent_ttl_secs: 3600,
    }
}

pub fn aggregation_config(min_count: u32) -> config::AggregationConfig {
    config::AggregationConfig {
        sweep_interval_secs: 60,
        bucket_ttl_secs: 600,
        min_count,
        min_count_overrides: HashMap::new(),
        sweep_lock_ttl_secs: 1,
    }
}

/// 一个"服务器进程"：自己的注册表、编排器和分发循环，接在共享总线上
pub struct TestProcess {
    pub registry: Arc<ConnectionRegistry>,
    pub orchestrator: Arc<DeliveryOrchestrator>,
}

impl TestProcess {
    pub fn start(
        cache: Arc<MemoryNotificationCache>,
        bus: Arc<dyn NotificationBus>,
        settings: Arc<MemorySettingsStore>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let orchestrator = Arc::new(DeliveryOrchestrator::new(
            DeliveryOrchestratorDependencies {
                cache,
                bus,
                registry: registry.clone(),
                settings,
                cache_config: cache_config(),
            },
        ));
        orchestrator.clone().spawn_dispatcher();

        Self {
            registry,
            orchestrator,
        }
    }
}

/// 完整的单进程引擎装配
pub struct TestEngine {
    pub cache: Arc<MemoryNotificationCache>,
    pub store: Arc<MemoryNotificationStore>,
    pub settings: Arc<MemorySettingsStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub aggregation: Arc<AggregationEngine>,
    pub service: NotificationService,
    pub query: NotificationQueryService,
}

pub fn start_engine(min_count: u32) -> TestEngine {
    let cache = Arc::new(MemoryNotificationCache::new());
    let store = Arc::new(MemoryNotificationStore::new());
    let settings = Arc::new(MemorySettingsStore::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let bus: Arc<dyn NotificationBus> = Arc::new(LocalNotificationBus::new(256));

    let orchestrator = Arc::new(DeliveryOrchestrator::new(
        DeliveryOrchestratorDependencies {
            cache: cache.clone(),
            bus,
            registry: registry.clone(),
            settings: settings.clone(),
            cache_config: cache_config(),
        },
    ));
    orchestrator.clone().spawn_dispatcher();

    let aggregation = Arc::new(AggregationEngine::new(AggregationEngineDependencies {
        cache: cache.clone(),
        repository: store.clone(),
        orchestrator: orchestrator.clone(),
        config: aggregation_config(min_count),
    }));

    let service = NotificationService::spawn(NotificationServiceDependencies {
        repository: store.clone(),
        settings: settings.clone(),
        aggregation: aggregation.clone(),
        orchestrator,
        worker_config: config::WorkerConfig {
            pool_size: 2,
            queue_capacity: 256,
        },
    });

    let query = NotificationQueryService::new(NotificationQueryServiceDependencies {
        repository: store.clone(),
        cache: cache.clone(),
        cache_config: cache_config(),
    });

    TestEngine {
        cache,
        store,
        settings,
        registry,
        aggregation,
        service,
        query,
    }
}

/// 可注入故障的假传输连接
pub struct FakeConnection {
    id: ConnectionId,
    recipient_id: UserId,
    opened_at: DateTime<Utc>,
    pub received: Mutex<Vec<PushPayload>>,
    pub send_attempts: AtomicUsize,
    pub fail_sends: AtomicBool,
    pub closed: AtomicBool,
}

impl FakeConnection {
    pub fn new(recipient_id: UserId) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::generate(),
            recipient_id,
            opened_at: Utc::now(),
            received: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn failing(recipient_id: UserId) -> Arc<Self> {
        let connection = Self::new(recipient_id);
        connection.fail_sends.store(true, Ordering::SeqCst);
        connection
    }

    pub async fn received_count(&self) -> usize {
        self.received.lock().await.len()
    }
}

#[async_trait]
impl TransportConnection for FakeConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn recipient_id(&self) -> UserId {
        self.recipient_id
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    fn last_active(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn send(&self, payload: &PushPayload) -> Result<(), TransportError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::send_failed("injected failure"));
        }
        self.received.lock().await.push(payload.clone());
        Ok(())
    }

    async fn send_keep_alive(&self) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn user() -> UserId {
    UserId::new(Uuid::new_v4())
}

/// 留给异步任务（工作者、分发循环、发送任务）一个调度窗口
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}
