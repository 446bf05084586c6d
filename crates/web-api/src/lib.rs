//! Web API 层。
//!
//! 提供 Axum 路由：事件接入、持久查询表面，以及两种长连接传输
//! （SSE 流与 WebSocket）的升级与生命周期管理。

mod error;
mod routes;
mod sse_connection;
mod state;
mod ws_connection;

pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
