//! 在线连接元数据
//!
//! 连接是进程本地、非持久化的：仅存在于 socket/stream 的生命周期内。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{ConnectionId, UserId};

/// 传输通道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// 单向服务器推送流（SSE）
    Stream,
    /// 双向套接字（WebSocket）
    Socket,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stream => "stream",
            TransportKind::Socket => "socket",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 连接描述信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMeta {
    pub connection_id: ConnectionId,
    pub recipient_id: UserId,
    pub transport: TransportKind,
    pub opened_at: DateTime<Utc>,
}

impl ConnectionMeta {
    pub fn new(recipient_id: UserId, transport: TransportKind) -> Self {
        Self {
            connection_id: ConnectionId::generate(),
            recipient_id,
            transport,
            opened_at: Utc::now(),
        }
    }
}
