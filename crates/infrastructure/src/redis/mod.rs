//! Redis 适配器
//!
//! 缓存存储客户端（计数器、有界列表、聚合桶、分布式锁）与
//! 共享频道的发布/订阅总线。

pub mod bus;
pub mod cache;

pub use bus::RedisNotificationBus;
pub use cache::RedisNotificationCache;
