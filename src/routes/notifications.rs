use crate::{
    error::{AppError, Result},
    models::notification::NotificationQuery,
    state::AppState,
    utils::middleware::OptionalAuth,
};
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
    response::Json,
    routing::get,
    Router,
};
use futures::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/subscribe", get(subscribe))
}

/// 获取当前用户的通知列表
/// GET /api/sns/notifications
pub async fn list_notifications(
    State(app_state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Value>> {
    let user = user.ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    let result = app_state.notification_service.list(&user.id, &query).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "notifications": result.data,
            "pagination": {
                "current_page": result.page,
                "total_pages": result.total_pages,
                "total_items": result.total,
                "items_per_page": result.per_page,
                "has_next": result.page < result.total_pages,
                "has_prev": result.page > 1,
            }
        }
    })))
}

/// 订阅实时通知流
/// GET /api/sns/notifications/subscribe
///
/// 返回 SSE 流，第一帧固定是连接确认；同一用户重复订阅时旧流会被断开。
pub async fn subscribe(
    State(app_state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let user = user.ok_or_else(|| AppError::unauthorized("Authentication required"))?;
    debug!("User {} subscribing to notification stream", user.id);

    let session = app_state.notification_service.connect(&user.id)?;
    let events = session.map(|frame| Ok::<_, Infallible>(frame.into_sse_event()));

    Ok(Sse::new(events))
}
