use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 通知类型，每种类型对应一条展示文案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    NewComment,
    NewLike,
}

impl NotificationKind {
    pub fn text(&self) -> &'static str {
        match self {
            NotificationKind::NewComment => "new Comment!",
            NotificationKind::NewLike => "new Like!",
        }
    }
}

/// 触发通知的上下文参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationArgs {
    /// 触发动作的用户
    pub actor_id: String,
    /// 动作所作用的对象（帖子）
    pub subject_id: String,
}

/// 事件总线上传输的通知事件
///
/// 发布之后不可变；消费失败时总线会重投同一事件。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub args: NotificationArgs,
}

impl NotificationEvent {
    pub fn new(recipient_id: &str, kind: NotificationKind, args: NotificationArgs) -> Self {
        Self {
            recipient_id: recipient_id.to_string(),
            kind,
            args,
        }
    }
}

/// 持久化的通知记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub args: NotificationArgs,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// 从总线事件生成待持久化的记录
    pub fn from_event(event: &NotificationEvent) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            recipient_id: event.recipient_id.clone(),
            kind: event.kind,
            args: event.args.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn to_response(&self) -> NotificationResponse {
        NotificationResponse {
            id: self.id.clone(),
            kind: self.kind,
            args: self.args.clone(),
            text: self.kind.text().to_string(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationResponse {
    pub id: String,
    pub kind: NotificationKind,
    pub args: NotificationArgs,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NotificationQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&NotificationKind::NewComment).unwrap();
        assert_eq!(json, "\"NEW_COMMENT\"");
        let json = serde_json::to_string(&NotificationKind::NewLike).unwrap();
        assert_eq!(json, "\"NEW_LIKE\"");

        let kind: NotificationKind = serde_json::from_str("\"NEW_LIKE\"").unwrap();
        assert_eq!(kind, NotificationKind::NewLike);
    }

    #[test]
    fn test_kind_text() {
        assert_eq!(NotificationKind::NewComment.text(), "new Comment!");
        assert_eq!(NotificationKind::NewLike.text(), "new Like!");
    }

    #[test]
    fn test_from_event_copies_fields() {
        let event = NotificationEvent::new(
            "user-42",
            NotificationKind::NewLike,
            NotificationArgs {
                actor_id: "user-7".to_string(),
                subject_id: "post-99".to_string(),
            },
        );

        let notification = Notification::from_event(&event);
        assert!(!notification.id.is_empty());
        assert_eq!(notification.recipient_id, "user-42");
        assert_eq!(notification.kind, NotificationKind::NewLike);
        assert_eq!(notification.args, event.args);
        assert!(notification.deleted_at.is_none());

        let response = notification.to_response();
        assert_eq!(response.text, "new Like!");
    }

    #[test]
    fn test_event_wire_roundtrip() {
        let event = NotificationEvent::new(
            "user-1",
            NotificationKind::NewComment,
            NotificationArgs {
                actor_id: "user-2".to_string(),
                subject_id: "post-3".to_string(),
            },
        );

        let payload = serde_json::to_string(&event).unwrap();
        assert!(payload.contains("\"NEW_COMMENT\""));
        assert!(payload.contains("\"recipient_id\":\"user-1\""));

        let decoded: NotificationEvent = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded.recipient_id, event.recipient_id);
        assert_eq!(decoded.kind, event.kind);
        assert_eq!(decoded.args, event.args);
    }
}
