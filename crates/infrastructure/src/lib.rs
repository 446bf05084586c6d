//! 基础设施层实现。
//!
//! 应用层端口的具体适配器：Redis 缓存与发布订阅、断路器降级总线、
//! PostgreSQL 持久存储，以及有界重试工具。

pub mod fallback_bus;
pub mod redis;
pub mod retry;
pub mod store;

pub use fallback_bus::FallbackNotificationBus;
pub use self::redis::{RedisNotificationBus, RedisNotificationCache};
pub use retry::{retry_async, Backoff, RetryConfig};
pub use store::{create_pg_pool, PgNotificationStore, PgSettingsStore};
