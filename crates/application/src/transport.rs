use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ConnectionId, TransportKind, UserId};
use thiserror::Error;

use crate::dto::PushPayload;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("send failed: {0}")]
    SendFailed(String),
}

impl TransportError {
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed(message.into())
    }
}

/// 在线连接的传输抽象
///
/// 两种实现：单向服务器推送流（SSE）和双向套接字（WebSocket）。
/// `send` 返回错误即视为连接已死，调用方负责把连接从注册表移除；
/// socket 实现内部对同一连接做有界退避重试，stream 实现不重试。
#[async_trait]
pub trait TransportConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn recipient_id(&self) -> UserId;

    fn kind(&self) -> TransportKind;

    fn opened_at(&self) -> DateTime<Utc>;

    /// 最近一次确认连接存活的时间
    fn last_active(&self) -> DateTime<Utc>;

    /// 投递一条推送负载
    async fn send(&self, payload: &PushPayload) -> Result<(), TransportError>;

    /// 发送保活帧（防止中间层空闲超时断开）
    async fn send_keep_alive(&self) -> Result<(), TransportError>;

    /// 关闭连接（尽力而为的完成信号，幂等）
    async fn close(&self);
}
