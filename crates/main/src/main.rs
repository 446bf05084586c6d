//! 主应用程序入口
//!
//! 装配通知引擎的各个组件并启动 Axum Web API 服务。

use std::sync::Arc;
use std::time::Duration;

use application::{
    AggregationEngine, AggregationEngineDependencies, ConnectionRegistry, DeliveryOrchestrator,
    DeliveryOrchestratorDependencies, LocalNotificationBus, NotificationBus,
    NotificationQueryService, NotificationQueryServiceDependencies, NotificationService,
    NotificationServiceDependencies, Scheduler,
};
use config::AppConfig;
use infrastructure::{
    create_pg_pool, FallbackNotificationBus, PgNotificationStore, PgSettingsStore,
    RedisNotificationBus, RedisNotificationCache,
};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let app_config = AppConfig::from_env();

    tracing::info!(
        database = app_config.database.url.split('@').next_back().unwrap_or("unknown"),
        "连接数据库"
    );

    // 持久存储：通知、投递记录与通知偏好
    let pg_pool = create_pg_pool(
        &app_config.database.url,
        app_config.database.max_connections,
    )
    .await?;
    let repository = Arc::new(PgNotificationStore::new(pg_pool.clone()));
    let settings = Arc::new(PgSettingsStore::new(pg_pool));

    // Redis：缓存视图 + 共享发布订阅总线
    let redis_client = Arc::new(redis::Client::open(app_config.redis.url.as_str())?);
    let cache = Arc::new(RedisNotificationCache::new(redis_client.clone()));

    // 总线外面套断路器：Redis 故障时退化为进程内广播
    let remote_bus = Arc::new(RedisNotificationBus::new(
        redis_client,
        app_config.bus.channel.clone(),
        &app_config.redis,
    ));
    let local_bus = Arc::new(LocalNotificationBus::new(app_config.bus.local_capacity));
    let bus: Arc<dyn NotificationBus> =
        Arc::new(FallbackNotificationBus::new(remote_bus, local_bus));

    // 连接注册表与投递编排
    let registry = Arc::new(ConnectionRegistry::new());
    let orchestrator = Arc::new(DeliveryOrchestrator::new(DeliveryOrchestratorDependencies {
        cache: cache.clone(),
        bus,
        registry: registry.clone(),
        settings: settings.clone(),
        cache_config: app_config.cache.clone(),
    }));
    let _dispatcher = orchestrator.clone().spawn_dispatcher();

    // 聚合引擎
    let aggregation = Arc::new(AggregationEngine::new(AggregationEngineDependencies {
        cache: cache.clone(),
        repository: repository.clone(),
        orchestrator: orchestrator.clone(),
        config: app_config.aggregation.clone(),
    }));

    // 事件处理工作者池
    let notification_service = Arc::new(NotificationService::spawn(
        NotificationServiceDependencies {
            repository: repository.clone(),
            settings: settings.clone(),
            aggregation: aggregation.clone(),
            orchestrator,
            worker_config: app_config.workers.clone(),
        },
    ));

    // 查询服务
    let query_service = Arc::new(NotificationQueryService::new(
        NotificationQueryServiceDependencies {
            repository,
            cache,
            cache_config: app_config.cache.clone(),
        },
    ));

    // 周期任务：聚合扫描 + 连接心跳
    let mut scheduler = Scheduler::new();
    {
        let aggregation = aggregation.clone();
        scheduler.spawn_recurring(
            "aggregation-sweep",
            Duration::from_secs(app_config.aggregation.sweep_interval_secs),
            move || {
                let aggregation = aggregation.clone();
                async move {
                    aggregation.sweep().await;
                }
            },
        );
    }
    {
        let registry = registry.clone();
        let idle_timeout = Duration::from_secs(app_config.connection.idle_timeout_secs);
        scheduler.spawn_recurring(
            "connection-heartbeat",
            Duration::from_secs(app_config.connection.heartbeat_interval_secs),
            move || {
                let registry = registry.clone();
                async move {
                    registry.heartbeat_sweep(idle_timeout).await;
                }
            },
        );
    }

    // 启动 Web 服务器
    let state = AppState::new(
        notification_service,
        query_service,
        registry.clone(),
        app_config.connection.clone(),
    );
    let app = router(state);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("通知服务启动在 http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("收到关闭信号");
        })
        .await?;

    // 优雅关闭：停掉周期任务，尽力关闭所有在线连接
    scheduler.shutdown().await;
    registry.drain().await;

    Ok(())
}
