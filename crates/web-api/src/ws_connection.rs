//! WebSocket 传输适配器
//!
//! 双向套接字连接的生命周期管理。所有对 sender 的写操作通过
//! mpsc 命令通道汇聚到单个发送任务，总线分发循环永远不会被
//! 慢客户端阻塞。与流式传输不同，socket 的瞬时写失败可以恢复，
//! 发送对同一连接做有界指数退避重试后才放弃。

use std::sync::{Arc, RwLock};
use std::time::Duration;

use application::dto::PushPayload;
use application::transport::{TransportConnection, TransportError};
use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use chrono::{DateTime, Utc};
use domain::{ConnectionId, ConnectionMeta, TransportKind, UserId};
use futures_util::{SinkExt, StreamExt};
use infrastructure::retry::{retry_async, RetryConfig};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// WebSocket 写操作命令
///
/// 使用命令模式统一管理所有对 WebSocket sender 的写操作
#[derive(Debug)]
pub(crate) enum WsCommand {
    SendText(String),
    SendPing(Vec<u8>),
    SendPong(Vec<u8>),
    Close,
}

pub struct SocketConnection {
    meta: ConnectionMeta,
    commands: mpsc::Sender<WsCommand>,
    last_active: RwLock<DateTime<Utc>>,
    retry_attempts: u32,
    retry_base: Duration,
}

impl SocketConnection {
    pub fn new(
        recipient_id: UserId,
        commands: mpsc::Sender<WsCommand>,
        retry_attempts: u32,
        retry_base: Duration,
    ) -> Self {
        Self {
            meta: ConnectionMeta::new(recipient_id, TransportKind::Socket),
            commands,
            last_active: RwLock::new(Utc::now()),
            retry_attempts,
            retry_base,
        }
    }

    pub(crate) fn touch(&self) {
        if let Ok(mut last_active) = self.last_active.write() {
            *last_active = Utc::now();
        }
    }

    fn try_command(&self, command: WsCommand) -> Result<(), TransportError> {
        self.commands.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            mpsc::error::TrySendError::Full(_) => {
                TransportError::send_failed("socket write buffer full")
            }
        })
    }
}

#[async_trait]
impl TransportConnection for SocketConnection {
    fn id(&self) -> ConnectionId {
        self.meta.connection_id
    }

    fn recipient_id(&self) -> UserId {
        self.meta.recipient_id
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn opened_at(&self) -> DateTime<Utc> {
        self.meta.opened_at
    }

    fn last_active(&self) -> DateTime<Utc> {
        self.last_active
            .read()
            .map(|guard| *guard)
            .unwrap_or(self.meta.opened_at)
    }

    async fn send(&self, payload: &PushPayload) -> Result<(), TransportError> {
        let frame = serde_json::json!({
            "event": payload.event_name(),
            "data": payload,
        });
        let text = frame.to_string();

        // 写缓冲暂满属于可恢复失败：对同一连接句柄退避重试，
        // 重试耗尽才交给调用方走移除路径
        retry_async(
            RetryConfig::retry_all(self.retry_attempts.max(1), self.retry_base),
            || async { self.try_command(WsCommand::SendText(text.clone())) },
        )
        .await?;

        self.touch();
        Ok(())
    }

    async fn send_keep_alive(&self) -> Result<(), TransportError> {
        self.try_command(WsCommand::SendPing(b"keep-alive".to_vec()))
    }

    async fn close(&self) {
        let _ = self.commands.try_send(WsCommand::Close);
    }
}

/// 运行一条 WebSocket 连接直到断开
///
/// 发送与接收拆成两个任务：发送任务消费命令通道，接收任务处理
/// 客户端帧（心跳回应、活跃度更新）。任意一侧结束即视为连接断开，
/// 清理注册表。
pub(crate) async fn handle_socket(socket: WebSocket, state: AppState, recipient_id: Uuid) {
    let recipient_id = UserId::from(recipient_id);
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

    let connection = Arc::new(SocketConnection::new(
        recipient_id,
        cmd_tx.clone(),
        state.connection_config.socket_retry_attempts,
        Duration::from_millis(state.connection_config.socket_retry_base_ms),
    ));
    let connection_id = connection.id();
    state.registry.register(connection.clone());

    info!(recipient_id = %recipient_id, connection_id = %connection_id, "WebSocket 连接已建立");

    let (mut sender, mut incoming) = socket.split();

    // 发送任务：统一处理所有对 WebSocket sender 的写操作
    let send_task = tokio::spawn(async move {
        while let Some(command) = cmd_rx.recv().await {
            match command {
                WsCommand::SendText(text) => {
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        warn!("Failed to send text message");
                        break;
                    }
                }
                WsCommand::SendPing(data) => {
                    if sender.send(WsMessage::Ping(data.into())).await.is_err() {
                        warn!("Failed to send ping message");
                        break;
                    }
                }
                WsCommand::SendPong(data) => {
                    if sender.send(WsMessage::Pong(data.into())).await.is_err() {
                        warn!("Failed to send pong message");
                        break;
                    }
                }
                WsCommand::Close => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
        debug!("WebSocket发送任务结束");
    });

    // 接收任务：处理来自客户端的帧
    let recv_connection = Arc::clone(&connection);
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = incoming.next().await {
            match message {
                WsMessage::Close(_) => {
                    debug!("WebSocket收到关闭消息");
                    break;
                }
                WsMessage::Ping(data) => {
                    recv_connection.touch();
                    if cmd_tx.try_send(WsCommand::SendPong(data.to_vec())).is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => {
                    recv_connection.touch();
                }
                WsMessage::Text(_) | WsMessage::Binary(_) => {
                    // 客户端消息只当作活跃信号
                    recv_connection.touch();
                }
            }
        }
        debug!("WebSocket接收任务结束");
    });

    // 等待任意一个任务完成（连接断开）
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    // 断开即移除，客户端重连时注册全新连接
    state.registry.remove(recipient_id, connection_id);
    info!(recipient_id = %recipient_id, connection_id = %connection_id, "WebSocket连接已断开");
}
