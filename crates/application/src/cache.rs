//! 缓存存储端口
//!
//! 对共享内存存储（计数器、有界列表、聚合桶、分布式锁）的抽象。
//! 所有操作必须可以被多个进程无协调地并发调用，原子性只依赖
//! 底层存储自身的原子原语。

use std::time::Duration;

use async_trait::async_trait;
use domain::UserId;
use thiserror::Error;

/// 缓存存储错误
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {message}")]
    Connection { message: String },
    #[error("cache command error: {message}")]
    Command { message: String },
}

impl CacheError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;

/// 通知缓存端口
///
/// 未读计数永远不是权威数据：读到 `None` 时调用方必须回退到
/// 持久存储重新计数。
#[async_trait]
pub trait NotificationCache: Send + Sync {
    /// 未读计数 +1，刷新TTL，返回新值
    async fn incr_unread(&self, recipient_id: UserId, ttl: Duration) -> CacheResult<i64>;

    /// 未读计数 -1（下限0），刷新TTL，返回新值
    async fn decr_unread(&self, recipient_id: UserId, ttl: Duration) -> CacheResult<i64>;

    /// 读取未读计数；缓存未命中返回 `None`，而不是0
    async fn get_unread(&self, recipient_id: UserId) -> CacheResult<Option<i64>>;

    /// 覆盖未读计数（持久层重新计数后回填）
    async fn set_unread(&self, recipient_id: UserId, count: i64, ttl: Duration) -> CacheResult<()>;

    /// 左插最近列表并裁剪到容量上限，刷新TTL
    async fn push_recent(
        &self,
        recipient_id: UserId,
        payload: &str,
        cap: usize,
        ttl: Duration,
    ) -> CacheResult<()>;

    /// 最近列表（最新在前）
    async fn recent(&self, recipient_id: UserId) -> CacheResult<Vec<String>>;

    /// 清空最近列表
    async fn clear_recent(&self, recipient_id: UserId) -> CacheResult<()>;

    /// 向聚合桶追加一个事件标记，创建时注册桶键并刷新TTL
    async fn bucket_append(&self, key: &str, marker: &str, ttl: Duration) -> CacheResult<()>;

    /// 当前已注册的桶键
    async fn bucket_keys(&self) -> CacheResult<Vec<String>>;

    /// 桶内事件标记数量（桶不存在返回0）
    async fn bucket_count(&self, key: &str) -> CacheResult<u64>;

    /// 原子地取出并删除整个桶
    ///
    /// 返回 `None` 表示桶已被其他扫描者消费或已过期，调用方直接跳过。
    /// 这是"桶至多被消费一次"不变量的实现点。
    async fn bucket_take(&self, key: &str) -> CacheResult<Option<Vec<String>>>;

    /// 尝试获取命名的分布式锁（`SET NX` 语义），成功返回 true
    async fn try_lock(&self, name: &str, ttl: Duration) -> CacheResult<bool>;
}

/// 内存实现（用于测试和单进程开发环境）
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct MemoryCacheState {
        unread: HashMap<UserId, i64>,
        recent: HashMap<UserId, Vec<String>>,
        buckets: HashMap<String, HashSet<String>>,
        locks: HashSet<String>,
    }

    /// 进程内缓存实现
    ///
    /// TTL 参数被接受但不过期，测试里不依赖时间流逝。
    #[derive(Default)]
    pub struct MemoryNotificationCache {
        state: Mutex<MemoryCacheState>,
    }

    impl MemoryNotificationCache {
        pub fn new() -> Self {
            Self::default()
        }

        /// 测试辅助：释放命名锁
        pub async fn release_lock(&self, name: &str) {
            let mut state = self.state.lock().await;
            state.locks.remove(name);
        }
    }

    #[async_trait]
    impl NotificationCache for MemoryNotificationCache {
        async fn incr_unread(&self, recipient_id: UserId, _ttl: Duration) -> CacheResult<i64> {
            let mut state = self.state.lock().await;
            let count = state.unread.entry(recipient_id).or_insert(0);
            *count += 1;
            Ok(*count)
        }

        async fn decr_unread(&self, recipient_id: UserId, _ttl: Duration) -> CacheResult<i64> {
            let mut state = self.state.lock().await;
            let count = state.unread.entry(recipient_id).or_insert(0);
            *count = (*count - 1).max(0);
            Ok(*count)
        }

        async fn get_unread(&self, recipient_id: UserId) -> CacheResult<Option<i64>> {
            let state = self.state.lock().await;
            Ok(state.unread.get(&recipient_id).copied())
        }

        async fn set_unread(
            &self,
            recipient_id: UserId,
            count: i64,
            _ttl: Duration,
        ) -> CacheResult<()> {
            let mut state = self.state.lock().await;
            state.unread.insert(recipient_id, count.max(0));
            Ok(())
        }

        async fn push_recent(
            &self,
            recipient_id: UserId,
            payload: &str,
            cap: usize,
            _ttl: Duration,
        ) -> CacheResult<()> {
            let mut state = self.state.lock().await;
            let list = state.recent.entry(recipient_id).or_default();
            list.insert(0, payload.to_string());
            list.truncate(cap);
            Ok(())
        }

        async fn recent(&self, recipient_id: UserId) -> CacheResult<Vec<String>> {
            let state = self.state.lock().await;
            Ok(state.recent.get(&recipient_id).cloned().unwrap_or_default())
        }

        async fn clear_recent(&self, recipient_id: UserId) -> CacheResult<()> {
            let mut state = self.state.lock().await;
            state.recent.remove(&recipient_id);
            Ok(())
        }

        async fn bucket_append(&self, key: &str, marker: &str, _ttl: Duration) -> CacheResult<()> {
            let mut state = self.state.lock().await;
            state
                .buckets
                .entry(key.to_string())
                .or_default()
                .insert(marker.to_string());
            Ok(())
        }

        async fn bucket_keys(&self) -> CacheResult<Vec<String>> {
            let state = self.state.lock().await;
            Ok(state.buckets.keys().cloned().collect())
        }

        async fn bucket_count(&self, key: &str) -> CacheResult<u64> {
            let state = self.state.lock().await;
            Ok(state.buckets.get(key).map(|s| s.len() as u64).unwrap_or(0))
        }

        async fn bucket_take(&self, key: &str) -> CacheResult<Option<Vec<String>>> {
            let mut state = self.state.lock().await;
            Ok(state
                .buckets
                .remove(key)
                .map(|markers| markers.into_iter().collect()))
        }

        async fn try_lock(&self, name: &str, _ttl: Duration) -> CacheResult<bool> {
            let mut state = self.state.lock().await;
            Ok(state.locks.insert(name.to_string()))
        }
    }
}
