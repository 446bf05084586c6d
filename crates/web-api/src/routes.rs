use std::convert::Infallible;

use axum::{
    extract::{
        ws::WebSocketUpgrade,
        Path, Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use application::{NotificationDto, UnreadCountDto};
use domain::{DeliveryId, DomainEvent, UserId};

use crate::{error::ApiError, sse_connection, state::AppState, ws_connection};

#[derive(Debug, Deserialize, Validate)]
struct ListQuery {
    #[validate(range(min = 1))]
    page: Option<u32>,
    #[validate(range(min = 1, max = 100))]
    per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
struct MarkAllReadResponse {
    updated: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(publish_event))
        .route("/users/{user_id}/notifications", get(list_notifications))
        .route(
            "/users/{user_id}/notifications/unread-count",
            get(unread_count),
        )
        .route(
            "/users/{user_id}/notifications/read-all",
            post(mark_all_read),
        )
        .route(
            "/users/{user_id}/notifications/{delivery_id}/read",
            post(mark_read),
        )
        .route(
            "/users/{user_id}/notifications/{delivery_id}",
            delete(delete_notification),
        )
        .route(
            "/users/{user_id}/notifications/stream",
            get(notification_stream),
        )
        .route("/users/{user_id}/notifications/ws", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// 事件接入：fire-and-forget
///
/// 只入队就返回 202；事件处理的成败不影响触发方，失败在异步
/// 边界内落日志终结。
async fn publish_event(
    State(state): State<AppState>,
    Json(event): Json<DomainEvent>,
) -> StatusCode {
    state.notification_service.publish_event(event);
    StatusCode::ACCEPTED
}

async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<NotificationDto>>, ApiError> {
    query
        .validate()
        .map_err(|err| ApiError::bad_request(err.to_string()))?;

    let notifications = state
        .query_service
        .list(
            UserId::from(user_id),
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(20),
        )
        .await?;

    Ok(Json(notifications))
}

async fn unread_count(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UnreadCountDto>, ApiError> {
    let count = state.query_service.unread_count(UserId::from(user_id)).await?;
    Ok(Json(count))
}

async fn mark_read(
    State(state): State<AppState>,
    Path((user_id, delivery_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .query_service
        .mark_read(UserId::from(user_id), DeliveryId::from(delivery_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_read(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<MarkAllReadResponse>, ApiError> {
    let updated = state
        .query_service
        .mark_all_read(UserId::from(user_id))
        .await?;
    Ok(Json(MarkAllReadResponse { updated }))
}

async fn delete_notification(
    State(state): State<AppState>,
    Path((user_id, delivery_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    state
        .query_service
        .delete(UserId::from(user_id), DeliveryId::from(delivery_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// SSE 长连接：服务器推送流
async fn notification_stream(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse_connection::notification_stream(state.registry.clone(), UserId::from(user_id))
}

/// WebSocket 升级
async fn websocket_upgrade(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| ws_connection::handle_socket(socket, state, user_id))
}
