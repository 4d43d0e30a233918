use crate::error::{AppError, Result};
use crate::models::comment::{Comment, CommentQuery, CreateCommentRequest};
use crate::models::like::Like;
use crate::models::notification::{NotificationArgs, NotificationEvent, NotificationKind};
use crate::models::post::{CreatePostRequest, ModifyPostRequest, Post, PostQuery};
use crate::services::bus::EventBus;
use crate::services::database::{Database, PageParams, PaginatedResult};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};
use validator::Validate;

/// 帖子服务：帖子及其评论、点赞
///
/// 评论和点赞落库之后向事件总线发布通知事件，接收者固定是帖子作者，
/// 作者给自己的帖子点赞或评论同样会产生事件。
#[derive(Clone)]
pub struct PostService {
    db: Database,
    bus: EventBus,
}

impl PostService {
    pub async fn new(db: Database, bus: EventBus) -> Result<Self> {
        Ok(Self { db, bus })
    }

    pub async fn create(&self, author_id: &str, request: CreatePostRequest) -> Result<Post> {
        request.validate()?;
        if request.body.chars().count() > self.db.config.max_post_length {
            return Err(AppError::validation("Post body is too long"));
        }

        let post = self
            .db
            .create("post", Post::new(request.title, request.body, author_id))
            .await?;

        info!("User {} created post {}", author_id, post.id);
        Ok(post)
    }

    /// 修改帖子，只有作者本人可以改
    pub async fn modify(
        &self,
        post_id: &str,
        author_id: &str,
        request: ModifyPostRequest,
    ) -> Result<Post> {
        request.validate()?;
        if request.body.chars().count() > self.db.config.max_post_length {
            return Err(AppError::validation("Post body is too long"));
        }

        let post = self.get(post_id).await?;
        if post.author_id != author_id {
            return Err(AppError::forbidden("Only the author can modify this post"));
        }

        let updated: Option<Post> = self
            .db
            .update_by_id_with_json(
                "post",
                post_id,
                json!({
                    "title": request.title,
                    "body": request.body,
                    "updated_at": Utc::now(),
                }),
            )
            .await?;

        debug!("User {} modified post {}", author_id, post_id);
        updated.ok_or_else(|| AppError::not_found("Post"))
    }

    /// 删除帖子，连同其评论和点赞一起软删除
    pub async fn delete(&self, post_id: &str, author_id: &str) -> Result<()> {
        let post = self.get(post_id).await?;
        if post.author_id != author_id {
            return Err(AppError::forbidden("Only the author can delete this post"));
        }

        self.db
            .query_with_params(
                "UPDATE type::thing($table, $id) SET deleted_at = time::now() RETURN NONE; \
                 UPDATE comment SET deleted_at = time::now() WHERE post_id = $id AND deleted_at IS NONE RETURN NONE; \
                 UPDATE post_like SET deleted_at = time::now() WHERE post_id = $id AND deleted_at IS NONE RETURN NONE",
                json!({
                    "table": "post",
                    "id": post_id,
                }),
            )
            .await?;

        info!("User {} deleted post {}", author_id, post_id);
        Ok(())
    }

    pub async fn get(&self, post_id: &str) -> Result<Post> {
        let post: Option<Post> = self.db.get_by_id("post", post_id).await?;
        match post {
            Some(post) if post.deleted_at.is_none() => Ok(post),
            _ => Err(AppError::not_found("Post")),
        }
    }

    /// 分页列出帖子，新的在前
    pub async fn list(&self, query: &PostQuery) -> Result<PaginatedResult<Post>> {
        self.page_posts(None, query).await
    }

    /// 某个作者的帖子
    pub async fn list_by_author(
        &self,
        author_id: &str,
        query: &PostQuery,
    ) -> Result<PaginatedResult<Post>> {
        self.page_posts(Some(author_id), query).await
    }

    async fn page_posts(
        &self,
        author_id: Option<&str>,
        query: &PostQuery,
    ) -> Result<PaginatedResult<Post>> {
        let params = PageParams::resolve(query.page, query.limit, &self.db.config);

        let author_filter = if author_id.is_some() {
            " AND author_id = $author"
        } else {
            ""
        };

        let count_sql = format!(
            "SELECT count() AS total FROM post WHERE deleted_at IS NONE{} GROUP ALL",
            author_filter
        );
        let mut count_response = self
            .db
            .query_with_params(&count_sql, json!({ "author": author_id }))
            .await?;
        let total = count_response
            .take::<Option<Value>>(0)?
            .and_then(|row| row.get("total").and_then(|t| t.as_u64()))
            .unwrap_or(0) as usize;

        let data_sql = format!(
            "SELECT *, meta::id(id) AS id FROM post WHERE deleted_at IS NONE{} ORDER BY created_at DESC LIMIT $limit START $offset",
            author_filter
        );
        let mut response = self
            .db
            .query_with_params(
                &data_sql,
                json!({
                    "author": author_id,
                    "limit": params.limit,
                    "offset": params.offset,
                }),
            )
            .await?;
        let posts: Vec<Post> = response.take(0)?;

        Ok(params.into_result(posts, total))
    }

    /// 点赞；同一用户对同一帖子只能有一条有效点赞
    pub async fn like(&self, post_id: &str, user_id: &str) -> Result<Like> {
        let post = self.get(post_id).await?;

        let existing: Option<Like> = {
            let mut response = self
                .db
                .query_with_params(
                    "SELECT *, meta::id(id) AS id FROM post_like WHERE post_id = $post AND user_id = $user AND deleted_at IS NONE LIMIT 1",
                    json!({
                        "post": post_id,
                        "user": user_id,
                    }),
                )
                .await?;
            response.take::<Vec<Like>>(0)?.into_iter().next()
        };
        if existing.is_some() {
            return Err(AppError::conflict("Already liked this post"));
        }

        let like = self
            .db
            .create("post_like", Like::new(post_id, user_id))
            .await?;

        self.bus
            .publish(&NotificationEvent::new(
                &post.author_id,
                NotificationKind::NewLike,
                NotificationArgs {
                    actor_id: user_id.to_string(),
                    subject_id: post_id.to_string(),
                },
            ))
            .await?;

        debug!("User {} liked post {}", user_id, post_id);
        Ok(like)
    }

    pub async fn like_count(&self, post_id: &str) -> Result<usize> {
        self.get(post_id).await?;

        let mut response = self
            .db
            .query_with_params(
                "SELECT count() AS total FROM post_like WHERE post_id = $post AND deleted_at IS NONE GROUP ALL",
                json!({ "post": post_id }),
            )
            .await?;
        let total = response
            .take::<Option<Value>>(0)?
            .and_then(|row| row.get("total").and_then(|t| t.as_u64()))
            .unwrap_or(0) as usize;
        Ok(total)
    }

    /// 发表评论
    pub async fn comment(
        &self,
        post_id: &str,
        author_id: &str,
        request: CreateCommentRequest,
    ) -> Result<Comment> {
        let text = request.comment.trim();
        if text.is_empty() {
            return Err(AppError::validation("Comment must not be empty"));
        }
        if text.chars().count() > self.db.config.max_comment_length {
            return Err(AppError::validation("Comment is too long"));
        }

        let post = self.get(post_id).await?;
        let comment = self
            .db
            .create("comment", Comment::new(post_id, author_id, text.to_string()))
            .await?;

        self.bus
            .publish(&NotificationEvent::new(
                &post.author_id,
                NotificationKind::NewComment,
                NotificationArgs {
                    actor_id: author_id.to_string(),
                    subject_id: post_id.to_string(),
                },
            ))
            .await?;

        debug!("User {} commented on post {}", author_id, post_id);
        Ok(comment)
    }

    /// 帖子的评论列表，旧的在前
    pub async fn comments(
        &self,
        post_id: &str,
        query: &CommentQuery,
    ) -> Result<PaginatedResult<Comment>> {
        self.get(post_id).await?;

        let params = PageParams::resolve(query.page, query.limit, &self.db.config);

        let mut count_response = self
            .db
            .query_with_params(
                "SELECT count() AS total FROM comment WHERE post_id = $post AND deleted_at IS NONE GROUP ALL",
                json!({ "post": post_id }),
            )
            .await?;
        let total = count_response
            .take::<Option<Value>>(0)?
            .and_then(|row| row.get("total").and_then(|t| t.as_u64()))
            .unwrap_or(0) as usize;

        let mut response = self
            .db
            .query_with_params(
                "SELECT *, meta::id(id) AS id FROM comment WHERE post_id = $post AND deleted_at IS NONE ORDER BY created_at ASC LIMIT $limit START $offset",
                json!({
                    "post": post_id,
                    "limit": params.limit,
                    "offset": params.offset,
                }),
            )
            .await?;
        let comments: Vec<Comment> = response.take(0)?;

        Ok(params.into_result(comments, total))
    }
}
