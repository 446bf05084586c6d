//! Redis 缓存存储客户端
//!
//! 未读计数、最近列表、聚合桶和扫描锁的 Redis 实现。所有写路径
//! 使用管道把修改与TTL刷新合并为一次往返；跨进程并发安全只依赖
//! Redis 自身的原子命令（INCR、SADD、DEL、SET NX）。

use std::sync::Arc;
use std::time::Duration;

use application::cache::{CacheError, CacheResult, NotificationCache};
use async_trait::async_trait;
use domain::UserId;
use redis::Client;
use tracing::debug;

/// 聚合桶的键索引集合
const BUCKET_INDEX_KEY: &str = "notify:buckets";

pub struct RedisNotificationCache {
    redis_client: Arc<Client>,
}

impl RedisNotificationCache {
    pub fn new(redis_client: Arc<Client>) -> Self {
        Self { redis_client }
    }

    fn unread_key(&self, recipient_id: UserId) -> String {
        format!("notify:unread:{recipient_id}")
    }

    fn recent_key(&self, recipient_id: UserId) -> String {
        format!("notify:recent:{recipient_id}")
    }

    fn lock_key(&self, name: &str) -> String {
        format!("notify:lock:{name}")
    }

    /// 获取连接
    async fn get_connection(&self) -> CacheResult<redis::aio::MultiplexedConnection> {
        self.redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::connection(format!("Redis connection failed: {e}")))
    }
}

fn command_error(e: redis::RedisError) -> CacheError {
    CacheError::command(format!("Redis operation failed: {e}"))
}

fn ttl_secs(ttl: Duration) -> i64 {
    (ttl.as_secs() as i64).max(1)
}

#[async_trait]
impl NotificationCache for RedisNotificationCache {
    async fn incr_unread(&self, recipient_id: UserId, ttl: Duration) -> CacheResult<i64> {
        let mut conn = self.get_connection().await?;
        let key = self.unread_key(recipient_id);

        let (count,): (i64,) = redis::pipe()
            .incr(&key, 1)
            .expire(&key, ttl_secs(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(count)
    }

    async fn decr_unread(&self, recipient_id: UserId, ttl: Duration) -> CacheResult<i64> {
        let mut conn = self.get_connection().await?;
        let key = self.unread_key(recipient_id);

        let (count,): (i64,) = redis::pipe()
            .decr(&key, 1)
            .expire(&key, ttl_secs(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        // 计数器只是计数不是日志：并发竞争下允许瞬时为负，读侧钳制为0
        if count < 0 {
            let _: () = redis::cmd("SET")
                .arg(&key)
                .arg(0)
                .arg("EX")
                .arg(ttl_secs(ttl))
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;
            return Ok(0);
        }

        Ok(count)
    }

    async fn get_unread(&self, recipient_id: UserId) -> CacheResult<Option<i64>> {
        let mut conn = self.get_connection().await?;

        // 键不存在返回 None 而不是 0，调用方回退到持久层重算
        let value: Option<i64> = redis::cmd("GET")
            .arg(self.unread_key(recipient_id))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(value.map(|count| count.max(0)))
    }

    async fn set_unread(&self, recipient_id: UserId, count: i64, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;

        let _: () = redis::cmd("SET")
            .arg(self.unread_key(recipient_id))
            .arg(count.max(0))
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(())
    }

    async fn push_recent(
        &self,
        recipient_id: UserId,
        payload: &str,
        cap: usize,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;
        let key = self.recent_key(recipient_id);

        let _: () = redis::pipe()
            .lpush(&key, payload)
            .ltrim(&key, 0, cap.saturating_sub(1) as isize)
            .expire(&key, ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(())
    }

    async fn recent(&self, recipient_id: UserId) -> CacheResult<Vec<String>> {
        let mut conn = self.get_connection().await?;

        let entries: Vec<String> = redis::cmd("LRANGE")
            .arg(self.recent_key(recipient_id))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(entries)
    }

    async fn clear_recent(&self, recipient_id: UserId) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;

        let _: () = redis::cmd("DEL")
            .arg(self.recent_key(recipient_id))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(())
    }

    async fn bucket_append(&self, key: &str, marker: &str, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.get_connection().await?;

        // 桶本身与键索引一起刷新TTL：索引比桶多活一轮扫描间隔，
        // 过期桶的索引残留由 bucket_count 清理
        let _: () = redis::pipe()
            .sadd(key, marker)
            .expire(key, ttl_secs(ttl))
            .sadd(BUCKET_INDEX_KEY, key)
            .expire(BUCKET_INDEX_KEY, ttl_secs(ttl) * 2)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(())
    }

    async fn bucket_keys(&self) -> CacheResult<Vec<String>> {
        let mut conn = self.get_connection().await?;

        let keys: Vec<String> = redis::cmd("SMEMBERS")
            .arg(BUCKET_INDEX_KEY)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(keys)
    }

    async fn bucket_count(&self, key: &str) -> CacheResult<u64> {
        let mut conn = self.get_connection().await?;

        let count: u64 = redis::cmd("SCARD")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        if count == 0 {
            // 桶已随TTL过期，顺手清掉索引残留
            let _: () = redis::cmd("SREM")
                .arg(BUCKET_INDEX_KEY)
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;
        }

        Ok(count)
    }

    async fn bucket_take(&self, key: &str) -> CacheResult<Option<Vec<String>>> {
        let mut conn = self.get_connection().await?;

        let markers: Vec<String> = redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        if markers.is_empty() {
            return Ok(None);
        }

        // DEL 的返回值是桶至多被消费一次的仲裁点：并发扫描者中
        // 只有真正删掉键的那个拿到桶的内容
        let (deleted,): (i64,) = redis::pipe()
            .del(key)
            .srem(BUCKET_INDEX_KEY, key)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        if deleted == 0 {
            debug!(bucket = key, "bucket consumed by another sweeper");
            return Ok(None);
        }

        Ok(Some(markers))
    }

    async fn try_lock(&self, name: &str, ttl: Duration) -> CacheResult<bool> {
        let mut conn = self.get_connection().await?;

        // SET NX EX：拿到锁的进程成为本轮扫描者；锁随TTL自动释放，
        // 持有者崩溃不会永久阻塞扫描
        let acquired: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(name))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        Ok(acquired.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_client() -> Arc<Client> {
        Arc::new(Client::open("redis://127.0.0.1:6379").unwrap())
    }

    // 注意：这些测试需要运行 Redis 实例才能通过
    #[tokio::test]
    async fn test_unread_counter_roundtrip() {
        if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
            return;
        }

        let cache = RedisNotificationCache::new(test_client());
        let user = UserId::new(Uuid::new_v4());
        let ttl = Duration::from_secs(60);

        assert_eq!(cache.get_unread(user).await.unwrap(), None);
        assert_eq!(cache.incr_unread(user, ttl).await.unwrap(), 1);
        assert_eq!(cache.incr_unread(user, ttl).await.unwrap(), 2);
        assert_eq!(cache.decr_unread(user, ttl).await.unwrap(), 1);
        assert_eq!(cache.decr_unread(user, ttl).await.unwrap(), 0);
        assert_eq!(cache.decr_unread(user, ttl).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_list_trimming() {
        if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
            return;
        }

        let cache = RedisNotificationCache::new(test_client());
        let user = UserId::new(Uuid::new_v4());
        let ttl = Duration::from_secs(60);

        for i in 0..8 {
            cache
                .push_recent(user, &format!("p{i}"), 5, ttl)
                .await
                .unwrap();
        }

        let recent = cache.recent(user).await.unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0], "p7");

        cache.clear_recent(user).await.unwrap();
        assert!(cache.recent(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bucket_take_is_exclusive() {
        if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
            return;
        }

        let cache = RedisNotificationCache::new(test_client());
        let key = format!("agg:test:{}", Uuid::new_v4());
        let ttl = Duration::from_secs(60);

        cache.bucket_append(&key, "m1", ttl).await.unwrap();
        cache.bucket_append(&key, "m2", ttl).await.unwrap();
        assert_eq!(cache.bucket_count(&key).await.unwrap(), 2);

        let taken = cache.bucket_take(&key).await.unwrap();
        assert_eq!(taken.map(|m| m.len()), Some(2));
        assert_eq!(cache.bucket_take(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweep_lock() {
        if std::env::var("REDIS_INTEGRATION_TEST").is_err() {
            return;
        }

        let cache = RedisNotificationCache::new(test_client());
        let name = format!("sweep-{}", Uuid::new_v4());

        assert!(cache.try_lock(&name, Duration::from_secs(5)).await.unwrap());
        assert!(!cache.try_lock(&name, Duration::from_secs(5)).await.unwrap());
    }
}
