//! 应用层实现。
//!
//! 这里提供通知引擎的用例服务与端口抽象：缓存存储、消息总线、
//! 连接注册表与传输通道、聚合引擎、投递编排，以及对外部协作者
//! （持久存储、设置模块）的边界。

pub mod aggregation;
pub mod bus;
pub mod cache;
pub mod delivery;
pub mod dto;
pub mod error;
pub mod registry;
pub mod render;
pub mod repository;
pub mod scheduler;
pub mod services;
pub mod transport;

pub use aggregation::{AggregationEngine, AggregationEngineDependencies};
pub use bus::{BusError, BusStream, Envelope, LocalNotificationBus, NotificationBus};
pub use cache::{CacheError, NotificationCache};
pub use delivery::{DeliveryOrchestrator, DeliveryOrchestratorDependencies};
pub use dto::{NotificationDto, PushPayload, UnreadCountDto};
pub use error::{ApplicationError, ApplicationResult};
pub use registry::ConnectionRegistry;
pub use repository::{NotificationRepository, SettingsStore};
pub use scheduler::Scheduler;
pub use services::{
    NotificationQueryService, NotificationQueryServiceDependencies, NotificationService,
    NotificationServiceDependencies,
};
pub use transport::{TransportConnection, TransportError};
