use crate::error::Result;
use crate::models::notification::{
    Notification, NotificationEvent, NotificationQuery, NotificationResponse,
};
use crate::models::user::User;
use crate::services::database::{Database, PageParams, PaginatedResult};
use crate::services::stream::{ConnectionRegistry, NotificationFrame, SessionStream};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 单次派发的结果；四种情况都算处理完成，事件可以确认
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 已持久化并实时推送
    Pushed,
    /// 已持久化，接收者不在线
    Stored,
    /// 已持久化，推送失败且会话已被摘除
    Evicted,
    /// 接收者不存在，事件被丢弃
    Dropped,
}

/// 通知服务
///
/// 消费侧入口是 dispatch：先校验接收者，再持久化，最后尽力实时推送。
/// 持久化成功是分界线，之后的推送失败只影响实时性，不影响事件确认。
#[derive(Clone)]
pub struct NotificationService {
    db: Database,
    registry: Arc<ConnectionRegistry>,
}

impl NotificationService {
    pub async fn new(db: Database, registry: Arc<ConnectionRegistry>) -> Result<Self> {
        Ok(Self { db, registry })
    }

    /// 处理一条总线事件
    ///
    /// 返回 Ok 表示事件已消化完毕（含丢弃），调用方应当确认；
    /// 返回 Err 表示持久化之前的步骤失败，调用方不确认，等总线重投。
    /// 重投可能造成重复通知，这里接受重复，不做去重。
    pub async fn dispatch(&self, event: &NotificationEvent) -> Result<DispatchOutcome> {
        let recipient: Option<User> = self.db.get_by_id("user", &event.recipient_id).await?;
        if !Self::recipient_live(recipient.as_ref()) {
            warn!(
                "Dropping {:?} event for unknown recipient {}",
                event.kind, event.recipient_id
            );
            return Ok(DispatchOutcome::Dropped);
        }

        // 先落库再推送，推送失败时通知仍可通过列表接口读到
        let notification = self.db.create("notification", Notification::from_event(event)).await?;

        Ok(Self::deliver(&self.registry, &notification))
    }

    /// 软删除的接收者视同不存在
    fn recipient_live(recipient: Option<&User>) -> bool {
        recipient.map_or(false, |user| user.deleted_at.is_none())
    }

    /// 尽力把通知推给在线会话；任何失败都立即摘除会话，不重试
    fn deliver(registry: &ConnectionRegistry, notification: &Notification) -> DispatchOutcome {
        let Some(session) = registry.get(&notification.recipient_id) else {
            debug!(
                "Recipient {} offline, notification {} stored only",
                notification.recipient_id, notification.id
            );
            return DispatchOutcome::Stored;
        };

        match session.push(NotificationFrame::notification(notification)) {
            Ok(()) => {
                debug!(
                    "Pushed notification {} to recipient {}",
                    notification.id, notification.recipient_id
                );
                DispatchOutcome::Pushed
            }
            Err(_) => {
                warn!(
                    "Evicting dead session {} for recipient {}",
                    session.id(),
                    notification.recipient_id
                );
                registry.remove(&notification.recipient_id, session.id());
                DispatchOutcome::Evicted
            }
        }
    }

    /// 为接收者打开实时通知流
    pub fn connect(&self, recipient_id: &str) -> Result<SessionStream> {
        self.registry.open_stream(
            recipient_id,
            Duration::from_secs(self.db.config.stream_idle_timeout_secs),
            self.db.config.stream_channel_capacity,
        )
    }

    /// 分页列出接收者的通知，新的在前
    pub async fn list(
        &self,
        recipient_id: &str,
        query: &NotificationQuery,
    ) -> Result<PaginatedResult<NotificationResponse>> {
        let params = PageParams::resolve(query.page, query.limit, &self.db.config);

        let mut count_response = self
            .db
            .query_with_params(
                "SELECT count() AS total FROM notification WHERE recipient_id = $recipient AND deleted_at IS NONE GROUP ALL",
                json!({ "recipient": recipient_id }),
            )
            .await?;
        let total = count_response
            .take::<Option<Value>>(0)?
            .and_then(|row| row.get("total").and_then(|t| t.as_u64()))
            .unwrap_or(0) as usize;

        let mut response = self
            .db
            .query_with_params(
                "SELECT *, meta::id(id) AS id FROM notification WHERE recipient_id = $recipient AND deleted_at IS NONE ORDER BY created_at DESC LIMIT $limit START $offset",
                json!({
                    "recipient": recipient_id,
                    "limit": params.limit,
                    "offset": params.offset,
                }),
            )
            .await?;
        let notifications: Vec<Notification> = response.take(0)?;

        Ok(params.into_result(
            notifications.iter().map(Notification::to_response).collect(),
            total,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::{NotificationArgs, NotificationKind};
    use crate::services::stream::StreamSession;

    fn stored_notification(recipient_id: &str) -> Notification {
        let event = NotificationEvent::new(
            recipient_id,
            NotificationKind::NewComment,
            NotificationArgs {
                actor_id: "actor-1".to_string(),
                subject_id: "post-1".to_string(),
            },
        );
        Notification::from_event(&event)
    }

    #[test]
    fn test_deleted_recipient_treated_as_unknown() {
        assert!(!NotificationService::recipient_live(None));

        let mut user = User::new("alice".to_string(), "hash".to_string());
        assert!(NotificationService::recipient_live(Some(&user)));

        user.deleted_at = Some(chrono::Utc::now());
        assert!(!NotificationService::recipient_live(Some(&user)));
    }

    #[test]
    fn test_deliver_without_session_stores_only() {
        let registry = ConnectionRegistry::new();
        let notification = stored_notification("user-1");

        let outcome = NotificationService::deliver(&registry, &notification);
        assert_eq!(outcome, DispatchOutcome::Stored);
    }

    #[test]
    fn test_deliver_pushes_to_live_session() {
        let registry = ConnectionRegistry::new();
        let (session, mut rx) = StreamSession::new("user-1", 8);
        registry.register(session);

        let notification = stored_notification("user-1");
        let outcome = NotificationService::deliver(&registry, &notification);

        assert_eq!(outcome, DispatchOutcome::Pushed);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.id.as_deref(), Some(notification.id.as_str()));
        assert!(frame.data.contains("new Comment!"));
    }

    #[test]
    fn test_deliver_evicts_dead_session_without_retry() {
        let registry = ConnectionRegistry::new();
        let (session, rx) = StreamSession::new("user-1", 8);
        registry.register(session);
        drop(rx);

        let notification = stored_notification("user-1");
        let outcome = NotificationService::deliver(&registry, &notification);

        assert_eq!(outcome, DispatchOutcome::Evicted);
        assert!(registry.get("user-1").is_none());

        // 会话摘除后再派发就是纯落库
        let outcome = NotificationService::deliver(&registry, &notification);
        assert_eq!(outcome, DispatchOutcome::Stored);
    }
}
