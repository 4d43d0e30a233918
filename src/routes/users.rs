use crate::{
    error::{AppError, Result},
    models::user::*,
    state::AppState,
    utils::middleware::OptionalAuth,
};
use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // 公开路由
        .route("/join", post(join))
        .route("/login", post(login))
        // 需要认证的路由
        .route("/me", get(get_current_user))
}

/// 注册新用户
/// POST /api/sns/users/join
pub async fn join(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<Value>> {
    debug!("Join request for username: {}", request.username);

    let user = app_state.user_service.join(request).await?;

    Ok(Json(json!({
        "success": true,
        "data": user
    })))
}

/// 登录并签发访问令牌
/// POST /api/sns/users/login
pub async fn login(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Value>> {
    debug!("Login request for username: {}", request.username);

    let (token, user) = app_state.user_service.login(request).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "token": token,
            "user": user
        }
    })))
}

/// 获取当前用户信息
/// GET /api/sns/users/me
pub async fn get_current_user(OptionalAuth(user): OptionalAuth) -> Result<Json<Value>> {
    let user = user.ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    Ok(Json(json!({
        "success": true,
        "data": user.to_response()
    })))
}
