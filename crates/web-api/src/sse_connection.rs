//! SSE 流式传输适配器
//!
//! 单向服务器推送：命名事件 `connected`、`notification`/`chat_message`，
//! 保活用注释帧。流式传输不做重试：任何发送失败都视为连接已死，
//! 由客户端负责重连（重连即注册一条全新连接）。

use std::convert::Infallible;
use std::sync::{Arc, RwLock};

use application::dto::PushPayload;
use application::transport::{TransportConnection, TransportError};
use application::ConnectionRegistry;
use async_trait::async_trait;
use axum::response::sse::{Event, Sse};
use chrono::{DateTime, Utc};
use domain::{ConnectionId, ConnectionMeta, TransportKind, UserId};
use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::info;

/// 推入 SSE 流的帧
pub(crate) enum SseFrame {
    Event(Event),
    Close,
}

/// 连接清理守卫：流被丢弃（客户端断开）时自动从注册表移除
pub(crate) struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    recipient_id: UserId,
    connection_id: ConnectionId,
}

impl ConnectionGuard {
    pub(crate) fn new(
        registry: Arc<ConnectionRegistry>,
        recipient_id: UserId,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            registry,
            recipient_id,
            connection_id,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        // 移除是幂等的，和发送失败触发的移除竞争也没关系
        self.registry.remove(self.recipient_id, self.connection_id);
    }
}

pub struct SseConnection {
    meta: ConnectionMeta,
    frames: mpsc::Sender<SseFrame>,
    last_active: RwLock<DateTime<Utc>>,
}

impl SseConnection {
    pub fn new(recipient_id: UserId, frames: mpsc::Sender<SseFrame>) -> Self {
        Self {
            meta: ConnectionMeta::new(recipient_id, TransportKind::Stream),
            frames,
            last_active: RwLock::new(Utc::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut last_active) = self.last_active.write() {
            *last_active = Utc::now();
        }
    }

    fn push_frame(&self, frame: SseFrame) -> Result<(), TransportError> {
        self.frames.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            mpsc::error::TrySendError::Full(_) => {
                TransportError::send_failed("client buffer full")
            }
        })
    }
}

#[async_trait]
impl TransportConnection for SseConnection {
    fn id(&self) -> ConnectionId {
        self.meta.connection_id
    }

    fn recipient_id(&self) -> UserId {
        self.meta.recipient_id
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
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
        let data = serde_json::to_string(payload)
            .map_err(|err| TransportError::send_failed(err.to_string()))?;

        self.push_frame(SseFrame::Event(
            Event::default().event(payload.event_name()).data(data),
        ))?;
        self.touch();
        Ok(())
    }

    async fn send_keep_alive(&self) -> Result<(), TransportError> {
        // 注释帧：客户端不可见，只为撑住中间层的空闲超时
        self.push_frame(SseFrame::Event(Event::default().comment("keep-alive")))?;
        self.touch();
        Ok(())
    }

    async fn close(&self) {
        let _ = self.frames.try_send(SseFrame::Close);
    }
}

/// 建立一条 SSE 通知流
pub(crate) fn notification_stream(
    registry: Arc<ConnectionRegistry>,
    recipient_id: UserId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (frames_tx, mut frames_rx) = mpsc::channel::<SseFrame>(64);
    let connection = Arc::new(SseConnection::new(recipient_id, frames_tx));
    let connection_id = connection.id();
    registry.register(connection);

    info!(recipient_id = %recipient_id, connection_id = %connection_id, "SSE 连接已建立");

    let guard = ConnectionGuard::new(registry, recipient_id, connection_id);
    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok::<_, Infallible>(Event::default().event("connected").data("{}"));

        while let Some(frame) = frames_rx.recv().await {
            match frame {
                SseFrame::Event(event) => yield Ok(event),
                SseFrame::Close => break,
            }
        }

        info!(recipient_id = %recipient_id, connection_id = %connection_id, "SSE 连接已关闭");
    };

    Sse::new(stream)
}
