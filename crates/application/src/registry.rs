//! 进程内连接注册表
//!
//! 接收者ID到其在线连接集合的映射。按接收者分片加锁（DashMap），
//! 不同用户的连接增删互不阻塞；同一接收者允许多个并发连接（多设备）。
//! 注册表是显式注入的实例，不是全局单例，测试可以各自隔离。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use domain::{ConnectionId, UserId};
use tracing::{debug, info, warn};

use crate::transport::TransportConnection;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, HashMap<ConnectionId, Arc<dyn TransportConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个新连接
    pub fn register(&self, connection: Arc<dyn TransportConnection>) {
        let recipient_id = connection.recipient_id();
        let connection_id = connection.id();

        self.connections
            .entry(recipient_id)
            .or_default()
            .insert(connection_id, connection);

        info!(
            recipient_id = %recipient_id,
            connection_id = %connection_id,
            "connection registered"
        );
    }

    /// 移除连接（幂等：重复移除是空操作）
    ///
    /// 多个关闭触发源（发送失败、心跳失败、显式断开）可能竞争，
    /// 返回值表示本次调用是否真正移除了连接。
    pub fn remove(&self, recipient_id: UserId, connection_id: ConnectionId) -> bool {
        let removed = self
            .connections
            .get_mut(&recipient_id)
            .map(|mut entry| entry.remove(&connection_id).is_some())
            .unwrap_or(false);

        if removed {
            self.connections
                .remove_if(&recipient_id, |_, conns| conns.is_empty());
            info!(
                recipient_id = %recipient_id,
                connection_id = %connection_id,
                "connection removed"
            );
        }

        removed
    }

    /// 接收者当前的在线连接
    pub fn connections_for(&self, recipient_id: UserId) -> Vec<Arc<dyn TransportConnection>> {
        self.connections
            .get(&recipient_id)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 本进程是否持有该接收者的连接（总线信封的本地过滤）
    pub fn has_connections(&self, recipient_id: UserId) -> bool {
        self.connections
            .get(&recipient_id)
            .map(|entry| !entry.is_empty())
            .unwrap_or(false)
    }

    /// 所有在线连接的快照
    pub fn all_connections(&self) -> Vec<Arc<dyn TransportConnection>> {
        self.connections
            .iter()
            .flat_map(|entry| entry.values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// 当前连接总数
    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|entry| entry.len()).sum()
    }

    /// 心跳扫描：空闲超时的连接关闭，其余发送保活帧；
    /// 保活失败走与负载发送失败相同的移除路径。
    pub async fn heartbeat_sweep(&self, idle_timeout: Duration) {
        let now = Utc::now();
        let idle_cutoff = chrono::Duration::from_std(idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        for connection in self.all_connections() {
            let recipient_id = connection.recipient_id();
            let connection_id = connection.id();

            if now.signed_duration_since(connection.last_active()) > idle_cutoff {
                debug!(
                    recipient_id = %recipient_id,
                    connection_id = %connection_id,
                    "connection idle timeout"
                );
                self.remove(recipient_id, connection_id);
                connection.close().await;
                continue;
            }

            if let Err(err) = connection.send_keep_alive().await {
                warn!(
                    recipient_id = %recipient_id,
                    connection_id = %connection_id,
                    error = %err,
                    "keep-alive failed, removing connection"
                );
                self.remove(recipient_id, connection_id);
                connection.close().await;
            }
        }
    }

    /// 进程关闭：尽力关闭所有连接并清空注册表，不做连接迁移
    pub async fn drain(&self) {
        let connections: Vec<_> = self.all_connections();
        self.connections.clear();

        let count = connections.len();
        for connection in connections {
            connection.close().await;
        }

        if count > 0 {
            info!(count, "registry drained on shutdown");
        }
    }
}
