use crate::{
    error::{AppError, Result},
    models::comment::{CommentQuery, CreateCommentRequest},
    models::post::*,
    state::AppState,
    utils::middleware::OptionalAuth,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // GET 公开，写操作在各自 handler 里要求认证
        .route("/", get(list_posts).post(create_post))
        .route("/mine", get(get_my_posts))
        .route("/:id", get(get_post).put(modify_post).delete(delete_post))
        .route("/:id/likes", get(get_like_count).post(like_post))
        .route("/:id/comments", get(get_post_comments).post(create_comment))
}

/// 获取帖子列表
/// GET /api/sns/posts
pub async fn list_posts(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<PostQuery>,
) -> Result<Json<Value>> {
    debug!("Fetching posts list with query: {:?}", query);

    let result = app_state.post_service.list(&query).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "posts": result.data,
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

/// 获取单个帖子
/// GET /api/sns/posts/:id
pub async fn get_post(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let post = app_state.post_service.get(&id).await?;

    Ok(Json(json!({
        "success": true,
        "data": post
    })))
}

/// 发布新帖子
/// POST /api/sns/posts
pub async fn create_post(
    State(app_state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    Json(request): Json<CreatePostRequest>,
) -> Result<Json<Value>> {
    let user = user.ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    let post = app_state.post_service.create(&user.id, request).await?;

    Ok(Json(json!({
        "success": true,
        "data": post
    })))
}

/// 当前用户的帖子列表
/// GET /api/sns/posts/mine
pub async fn get_my_posts(
    State(app_state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    Query(query): Query<PostQuery>,
) -> Result<Json<Value>> {
    let user = user.ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    let result = app_state
        .post_service
        .list_by_author(&user.id, &query)
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "posts": result.data,
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

/// 修改帖子
/// PUT /api/sns/posts/:id
pub async fn modify_post(
    State(app_state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<String>,
    Json(request): Json<ModifyPostRequest>,
) -> Result<Json<Value>> {
    let user = user.ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    let post = app_state.post_service.modify(&id, &user.id, request).await?;

    Ok(Json(json!({
        "success": true,
        "data": post
    })))
}

/// 删除帖子
/// DELETE /api/sns/posts/:id
pub async fn delete_post(
    State(app_state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let user = user.ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    app_state.post_service.delete(&id, &user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": null
    })))
}

/// 点赞帖子
/// POST /api/sns/posts/:id/likes
pub async fn like_post(
    State(app_state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let user = user.ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    let like = app_state.post_service.like(&id, &user.id).await?;

    Ok(Json(json!({
        "success": true,
        "data": like
    })))
}

/// 获取帖子点赞数
/// GET /api/sns/posts/:id/likes
pub async fn get_like_count(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let count = app_state.post_service.like_count(&id).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "post_id": id,
            "likes": count
        }
    })))
}

/// 发表评论
/// POST /api/sns/posts/:id/comments
pub async fn create_comment(
    State(app_state): State<Arc<AppState>>,
    OptionalAuth(user): OptionalAuth,
    Path(id): Path<String>,
    Json(request): Json<CreateCommentRequest>,
) -> Result<Json<Value>> {
    let user = user.ok_or_else(|| AppError::unauthorized("Authentication required"))?;

    let comment = app_state.post_service.comment(&id, &user.id, request).await?;

    Ok(Json(json!({
        "success": true,
        "data": comment
    })))
}

/// 获取帖子评论列表
/// GET /api/sns/posts/:id/comments
pub async fn get_post_comments(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<CommentQuery>,
) -> Result<Json<Value>> {
    let result = app_state.post_service.comments(&id, &query).await?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "comments": result.data,
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
